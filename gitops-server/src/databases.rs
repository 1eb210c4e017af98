use std::collections::HashSet;

use crate::model::Database;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseLookupError {
    #[error("find database: {0}")]
    Store(#[from] StoreError),

    #[error("project {project_id} does not have database {name:?}")]
    NotFound { project_id: i64, name: String },

    #[error("project {project_id} does not have database {name:?} for environment {environment:?}")]
    NotInEnvironment {
        project_id: i64,
        name: String,
        environment: String,
    },

    #[error("project {project_id} has multiple databases {name:?} for environment {environment:?}")]
    Ambiguous {
        project_id: i64,
        name: String,
        environment: String,
    },
}

/// Databases named `name` in the project, narrowed to `environment` when given.
///
/// The same database name may exist once per environment. Two in the same
/// environment cannot be told apart and fail the lookup.
pub async fn find_project_databases(
    store: &dyn Store,
    project_id: i64,
    name: &str,
    environment: &str,
) -> Result<Vec<Database>, DatabaseLookupError> {
    let found = store.find_databases(project_id, name).await?;
    if found.is_empty() {
        return Err(DatabaseLookupError::NotFound {
            project_id,
            name: name.to_string(),
        });
    }

    let filtered: Vec<Database> = if environment.is_empty() {
        found
    } else {
        let filtered: Vec<Database> = found
            .into_iter()
            .filter(|db| db.instance.environment.name.eq_ignore_ascii_case(environment))
            .collect();
        if filtered.is_empty() {
            return Err(DatabaseLookupError::NotInEnvironment {
                project_id,
                name: name.to_string(),
                environment: environment.to_string(),
            });
        }
        filtered
    };

    let mut seen = HashSet::new();
    for db in &filtered {
        if !seen.insert(db.instance.environment.id) {
            return Err(DatabaseLookupError::Ambiguous {
                project_id,
                name: name.to_string(),
                environment: environment.to_string(),
            });
        }
    }
    Ok(filtered)
}
