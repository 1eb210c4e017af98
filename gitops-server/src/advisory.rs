//! SQL review of pull request files, reported back in the CI system's format.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use gitops_core::advisor::{Advice, AdviceCode, AdviceStatus, DbType, SqlReviewContext};
use gitops_core::report::{to_github_action_result, to_gitlab_ci_result, SqlReviewResult};
use gitops_core::vcs::{Commit, DistinctFileItem, FileItemType, VcsType};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::databases::find_project_databases;
use crate::error::WebhookError;
use crate::model::Repository;
use crate::pipeline::classify::{group_by_repository, FileInfo};
use crate::AppState;

/// Body the CI job posts to `/webhook/sql-review/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlReviewRequest {
    pub repository_id: String,
    pub pull_request_id: String,
    #[serde(rename = "webURL")]
    pub web_url: String,
}

/// Reviews every changed SQL file of a pull request.
///
/// `repositories` are the links that accepted the request; the first one's
/// credentials are used to list the pull request. Files are reviewed
/// concurrently and a file whose review fails is left out of the report.
pub async fn review_pull_request(
    state: Arc<AppState>,
    repositories: &[Repository],
    request: &SqlReviewRequest,
) -> Result<SqlReviewResult, WebhookError> {
    let Some(repo) = repositories.first() else {
        return Ok(SqlReviewResult::empty());
    };
    let vcs_type = repo.vcs.as_ref().map(|v| v.vcs_type).unwrap_or(VcsType::GitLabSelfHost);

    let pr_files = {
        let session = state.session(repo)?;
        session
            .provider
            .list_pull_request_files(&session.target(), &request.pull_request_id)
            .await
            .map_err(|e| WebhookError::internal("Failed to list pull request file", e))?
    };

    let items: Vec<DistinctFileItem> = pr_files
        .into_iter()
        .filter(|f| !f.is_deleted)
        .map(|f| {
            let commit = Commit {
                id: f.last_commit_id,
                ..Default::default()
            };
            DistinctFileItem::new(f.path, commit, FileItemType::Modified)
        })
        .collect();

    let mut tasks = JoinSet::new();
    for file in group_by_repository(&items, repositories).groups.into_iter().flatten() {
        let state = Arc::clone(&state);
        tasks.spawn(async move {
            let result = sql_advice_for_file(&state, &file).await;
            (file.item.file_name, file.repository.external_id, result)
        });
    }

    let total = tasks.len();
    let mut failed = 0;
    let mut advice_map: BTreeMap<String, Vec<Advice>> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((file, _, Ok(advice))) => advice_map.entry(file).or_default().extend(advice),
            Ok((file, external_id, Err(e))) => {
                failed += 1;
                debug!("Failed to take SQL review for file {} in {}: {:#}", file, external_id, e);
            }
            Err(e) => {
                failed += 1;
                error!("SQL review task failed: {}", e);
            }
        }
    }

    if state.sql_review_fail_on_error && total > 0 && failed == total {
        return Err(WebhookError::internal(
            "Failed to review any file of the pull request",
            anyhow!("{} of {} file(s) failed", failed, total),
        ));
    }

    let response = format_review_result(vcs_type, &advice_map);
    info!(
        "SQL review finished for pull request {} of {} with status {}",
        request.pull_request_id, request.repository_id, response.status
    );
    Ok(response)
}

/// Renders the advice in the report format of the repository's CI system.
pub fn format_review_result(vcs_type: VcsType, advice_map: &BTreeMap<String, Vec<Advice>>) -> SqlReviewResult {
    match vcs_type {
        VcsType::GitHubCom => to_github_action_result(advice_map),
        VcsType::GitLabSelfHost => to_gitlab_ci_result(advice_map),
    }
}

/// Advice for one file, taken against the first matching database whose
/// environment has a SQL review policy.
async fn sql_advice_for_file(state: &AppState, file: &FileInfo) -> anyhow::Result<Vec<Advice>> {
    let repo = &file.repository;
    let info = &file.migration_info;
    debug!("Processing file {} for SQL review", file.item.file_name);

    if repo.project.is_tenant() {
        return Ok(vec![Advice {
            status: AdviceStatus::Warn,
            code: AdviceCode::UNSUPPORTED,
            title: "Tenant mode is not supported".to_string(),
            content: format!("Project {} is a tenant mode project.", repo.project.name),
            line: 1,
        }]);
    }

    let databases = find_project_databases(state.store.as_ref(), repo.project.id, &info.database, &info.environment)
        .await
        .with_context(|| format!("Failed to list database {:?}", info.database))?;

    let statement = {
        let session = state.session(repo)?;
        session
            .provider
            .read_file_content(&session.target(), &file.item.file_name, &file.item.commit.id)
            .await
            .with_context(|| format!("Failed to read file content for {}", file.item.file_name))?
    };

    for database in &databases {
        let environment_id = database.instance.environment.id;
        let Some(policy) = state
            .store
            .get_sql_review_policy(environment_id)
            .await
            .with_context(|| format!("Failed to get SQL review policy in environment {}", environment_id))?
        else {
            debug!("No SQL review policy in environment {}", environment_id);
            continue;
        };

        let db_type = DbType::try_from(database.instance.engine)?;
        let catalog = state
            .store
            .get_catalog(database)
            .await
            .with_context(|| format!("Failed to get catalog for database {}", database.id))?;
        let connection = state
            .drivers
            .open_read_only(database)
            .await
            .with_context(|| format!("Failed to open database {}", database.id))?;

        let result = state
            .reviewer
            .check(
                &statement,
                &policy.rule_list,
                SqlReviewContext {
                    charset: &database.character_set,
                    collation: &database.collation,
                    db_type,
                    catalog: &catalog,
                    connection: connection.as_ref(),
                },
            )
            .await;
        if let Err(e) = connection.close().await {
            warn!("Failed to close connection to database {}: {}", database.id, e);
        }

        return result.with_context(|| format!("Failed to exec the SQL check for database {}", database.id));
    }

    Ok(vec![Advice {
        status: AdviceStatus::Warn,
        code: AdviceCode::NOT_FOUND,
        title: "SQL review policy not found".to_string(),
        content: format!(
            "You can configure the SQL review policy on {}/setting/sql-review",
            state.profile.external_url
        ),
        line: 1,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Profile, ReleaseMode};
    use crate::model::{Project, RepositoryCreate, TenantMode};
    use crate::store::InMemoryStore;
    use crate::VcsProviders;
    use gitops_core::migration::{MigrationInfo, MigrationKind};

    fn state() -> AppState {
        let config = Config {
            port: 3000,
            profile: Profile {
                external_url: "https://bb.example.com".to_string(),
                workspace_id: "ws".to_string(),
                mode: ReleaseMode::Prod,
            },
            license_multi_tenancy: true,
            sql_review_fail_on_error: false,
            store_seed_path: None,
            admin_auth_token: None,
        };
        AppState::with_memory_store(
            &config,
            Arc::new(InMemoryStore::new()),
            VcsProviders::http().unwrap(),
        )
    }

    #[test]
    fn test_request_uses_ci_field_names() {
        let request: SqlReviewRequest = serde_json::from_str(
            r#"{"repositoryId": "acme/shop", "pullRequestId": "7", "webURL": "https://github.com/acme/shop"}"#,
        )
        .unwrap();
        assert_eq!(request.repository_id, "acme/shop");
        assert_eq!(request.pull_request_id, "7");
        assert_eq!(request.web_url, "https://github.com/acme/shop");
    }

    #[tokio::test]
    async fn test_tenant_project_is_not_reviewed() {
        let state = state();
        let repository = Repository::from_parts(
            1,
            RepositoryCreate::default(),
            Project {
                id: 1,
                name: "fleet".to_string(),
                tenant_mode: TenantMode::Tenant,
                ..Default::default()
            },
            None,
        );
        let file = FileInfo {
            item: DistinctFileItem::new("v1__fleet__migrate__init.sql", Commit::default(), FileItemType::Modified),
            migration_info: MigrationInfo {
                database: "fleet".to_string(),
                environment: String::new(),
                version: "v1".to_string(),
                kind: MigrationKind::Migrate,
                description: "init".to_string(),
            },
            file_type: crate::pipeline::classify::FileType::Migration,
            repository,
        };

        let advice = sql_advice_for_file(&state, &file).await.unwrap();
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].code, AdviceCode::UNSUPPORTED);
        assert_eq!(advice[0].content, "Project fleet is a tenant mode project.");
    }

    #[test]
    fn test_format_picks_ci_dialect() {
        let mut map = BTreeMap::new();
        map.insert(
            "db/v1__shop__migrate__init.sql".to_string(),
            vec![Advice {
                status: AdviceStatus::Warn,
                code: AdviceCode::NOT_FOUND,
                title: "SQL review policy not found".to_string(),
                content: "configure it".to_string(),
                line: 1,
            }],
        );

        let github = format_review_result(VcsType::GitHubCom, &map);
        assert_eq!(github.status, AdviceStatus::Warn);
        assert!(github.content[0].starts_with("::warning file=db/v1__shop__migrate__init.sql,line=1"));

        let gitlab = format_review_result(VcsType::GitLabSelfHost, &map);
        assert_eq!(gitlab.status, AdviceStatus::Warn);
        assert!(gitlab.content[0].contains("<testsuites name=\"SQL Review\">"));
    }
}
