//! Assigns each changed file to exactly one repository link and orders the
//! result for issue creation.

use gitops_core::migration::{self, MigrationInfo, MigrationKind};
use gitops_core::template;
use gitops_core::vcs::DistinctFileItem;
use tracing::{debug, error, warn};

use crate::model::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Migration,
    Schema,
}

/// A changed file together with what it is and where it belongs.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub item: DistinctFileItem,
    pub migration_info: MigrationInfo,
    pub file_type: FileType,
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("only DML is allowed for YAML files in a tenant project")]
    YamlNotData { repository_id: i64 },

    #[error("{reason}")]
    InvalidTemplate { repository_id: i64, reason: String },

    #[error("file change is not associated with any project")]
    NoProject,

    #[error("file change should be associated with exactly one project but found {0}")]
    MultipleProjects(String),
}

/// A file dropped during classification that belongs to a known link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredFile {
    pub file: String,
    pub repository_id: i64,
    pub reason: String,
}

/// Classified files grouped by link, plus the files to report as ignored.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub groups: Vec<Vec<FileInfo>>,
    pub ignored: Vec<IgnoredFile>,
}

/// Matches `item` against every candidate link's templates.
///
/// Exactly one link must claim the file. A template error on one link skips
/// that link; it is returned only when no other link claims the file.
pub fn classify_file<'a>(
    item: &DistinctFileItem,
    repositories: &'a [Repository],
) -> Result<(MigrationInfo, FileType, &'a Repository), ClassifyError> {
    let mut matched: Vec<(MigrationInfo, FileType, &'a Repository)> = Vec::new();
    let mut template_error = None;

    for repo in repositories {
        if !item.file_name.starts_with(&repo.base_directory) {
            debug!(
                "Ignored file {} outside the base directory {}",
                item.file_name, repo.base_directory
            );
            continue;
        }

        let mut file_path_template = template::join_path(&repo.base_directory, &repo.file_path_template);
        let mut allow_omit_database = false;
        if repo.project.is_tenant() {
            if item.is_yaml {
                file_path_template = file_path_template.replacen(".sql", ".yml", 1);
                allow_omit_database = true;
            } else if repo.project.db_name_template.is_empty() {
                // An empty database name template targets every database.
                allow_omit_database = true;
            }
        }

        match migration::parse_migration_info(&item.file_name, &file_path_template, allow_omit_database) {
            Ok(Some(info)) => {
                if item.is_yaml && info.kind != MigrationKind::Data {
                    return Err(ClassifyError::YamlNotData { repository_id: repo.id });
                }
                matched.push((info, FileType::Migration, repo));
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    "Failed to parse migration file info for {} in project {}: {}",
                    item.file_name, repo.project.id, e
                );
                template_error.get_or_insert(ClassifyError::InvalidTemplate {
                    repository_id: repo.id,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        match migration::parse_schema_file_info(&repo.base_directory, &repo.schema_path_template, &item.file_name) {
            Ok(Some(info)) => matched.push((info, FileType::Schema, repo)),
            Ok(None) => {}
            Err(e) => {
                debug!("Failed to parse schema file info for {}: {}", item.file_name, e);
            }
        }
    }

    match matched.len() {
        0 => Err(template_error.unwrap_or(ClassifyError::NoProject)),
        1 => Ok(matched.remove(0)),
        _ => Err(ClassifyError::MultipleProjects(
            matched
                .iter()
                .map(|(_, _, repo)| repo.project.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

/// Classifies `items` and groups them by repository link, in first-seen order.
///
/// Files no link claims are dropped with a log line. Files a link claimed but
/// could not parse are returned in `ignored`.
pub fn group_by_repository(items: &[DistinctFileItem], repositories: &[Repository]) -> Grouping {
    let mut groups: Vec<(i64, Vec<FileInfo>)> = Vec::new();
    let mut ignored = Vec::new();

    for item in items {
        debug!("Processing file {} from commit {}", item.file_name, item.commit.id);
        let (migration_info, file_type, repo) = match classify_file(item, repositories) {
            Ok(classified) => classified,
            Err(e @ ClassifyError::NoProject) => {
                warn!("Ignored repository file {}: {}", item.file_name, e);
                continue;
            }
            Err(ClassifyError::MultipleProjects(projects)) => {
                error!(
                    "Ignored repository file {}: matched more than one project: {}",
                    item.file_name, projects
                );
                continue;
            }
            Err(
                e @ (ClassifyError::YamlNotData { repository_id }
                | ClassifyError::InvalidTemplate { repository_id, .. }),
            ) => {
                warn!("Ignored repository file {}: {}", item.file_name, e);
                ignored.push(IgnoredFile {
                    file: item.file_name.clone(),
                    repository_id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let info = FileInfo {
            item: item.clone(),
            migration_info,
            file_type,
            repository: repo.clone(),
        };
        match groups.iter_mut().find(|(id, _)| *id == repo.id) {
            Some((_, files)) => files.push(info),
            None => groups.push((repo.id, vec![info])),
        }
    }

    Grouping {
        groups: groups.into_iter().map(|(_, files)| files).collect(),
        ignored,
    }
}

/// Splits one repository's files by database name, in first-seen order.
pub fn group_by_database(files: Vec<FileInfo>) -> Vec<Vec<FileInfo>> {
    let mut groups: Vec<Vec<FileInfo>> = Vec::new();
    for file in files {
        match groups
            .iter_mut()
            .find(|g| g[0].migration_info.database == file.migration_info.database)
        {
            Some(group) => group.push(file),
            None => groups.push(vec![file]),
        }
    }
    groups
}

/// Stable sort by (database, schema version), comparing strings ordinally.
pub fn sort_by_schema_version(files: &mut [FileInfo]) {
    files.sort_by(|a, b| {
        let a = &a.migration_info;
        let b = &b.migration_info;
        (a.database.as_str(), a.version.as_str()).cmp(&(b.database.as_str(), b.version.as_str()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Project, RepositoryCreate, RowStatus, SchemaChangeType, TenantMode, WorkflowType};
    use gitops_core::vcs::{Commit, FileItemType};
    use proptest::prelude::*;

    const MIGRATION_TEMPLATE: &str = "{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{TYPE}}__{{DESCRIPTION}}.sql";

    fn repo(id: i64, project: &str, base_directory: &str, tenant: bool) -> Repository {
        Repository::from_parts(
            id,
            RepositoryCreate {
                base_directory: base_directory.to_string(),
                file_path_template: MIGRATION_TEMPLATE.to_string(),
                schema_path_template: "{{ENV_NAME}}/.{{DB_NAME}}__LATEST.sql".to_string(),
                ..Default::default()
            },
            Project {
                id,
                name: project.to_string(),
                row_status: RowStatus::Normal,
                tenant_mode: if tenant { TenantMode::Tenant } else { TenantMode::Disabled },
                db_name_template: String::new(),
                schema_change_type: SchemaChangeType::Ddl,
                workflow_type: WorkflowType::Vcs,
            },
            None,
        )
    }

    fn item(path: &str) -> DistinctFileItem {
        DistinctFileItem::new(path, Commit::default(), FileItemType::Added)
    }

    #[test]
    fn test_classify_migration_and_schema_files() {
        let repos = vec![repo(1, "shop", "bytebase", false)];

        let (info, file_type, matched) =
            classify_file(&item("bytebase/dev/v1__shop__migrate__init.sql"), &repos).unwrap();
        assert_eq!(file_type, FileType::Migration);
        assert_eq!(matched.id, 1);
        assert_eq!(info.database, "shop");
        assert_eq!(info.environment, "dev");
        assert_eq!(info.version, "v1");

        let (info, file_type, _) = classify_file(&item("bytebase/dev/.shop__LATEST.sql"), &repos).unwrap();
        assert_eq!(file_type, FileType::Schema);
        assert_eq!(info.kind, MigrationKind::MigrateSdl);
        assert_eq!(info.database, "shop");
    }

    #[test]
    fn test_classify_outside_base_directory() {
        let repos = vec![repo(1, "shop", "bytebase", false)];
        assert_eq!(
            classify_file(&item("other/dev/v1__shop__migrate__init.sql"), &repos).unwrap_err(),
            ClassifyError::NoProject
        );
    }

    #[test]
    fn test_classify_conflicting_projects() {
        let repos = vec![repo(1, "shop", "", false), repo(2, "billing", "", false)];
        assert_eq!(
            classify_file(&item("dev/v1__shop__migrate__init.sql"), &repos).unwrap_err(),
            ClassifyError::MultipleProjects("shop, billing".to_string())
        );
    }

    #[test]
    fn test_tenant_yaml_must_be_data() {
        let repos = vec![repo(1, "shop", "", true)];
        // ENV_NAME is captured but tenant projects ignore it downstream.
        let (info, _, _) = classify_file(&item("dev/v1__shop__data__seed.yml"), &repos).unwrap();
        assert_eq!(info.kind, MigrationKind::Data);

        assert_eq!(
            classify_file(&item("dev/v2__shop__migrate__alter.yml"), &repos).unwrap_err(),
            ClassifyError::YamlNotData { repository_id: 1 }
        );
    }

    #[test]
    fn test_invalid_type_is_reported_against_its_link() {
        let repos = vec![repo(7, "shop", "", false)];
        let items = vec![item("dev/v2__shop__drop__x.sql"), item("dev/v3__shop__migrate__y.sql")];

        let grouping = group_by_repository(&items, &repos);
        assert_eq!(grouping.groups.len(), 1);
        assert_eq!(grouping.groups[0].len(), 1);
        assert_eq!(grouping.ignored.len(), 1);
        let ignored = &grouping.ignored[0];
        assert_eq!(ignored.file, "dev/v2__shop__drop__x.sql");
        assert_eq!(ignored.repository_id, 7);
        assert!(ignored.reason.contains("invalid migration type \"drop\""));
    }

    #[test]
    fn test_template_error_yields_to_a_claiming_link() {
        let mut strict = repo(1, "shop", "", false);
        strict.file_path_template = "{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{TYPE}}.sql".to_string();
        let mut loose = repo(2, "billing", "", false);
        loose.file_path_template = "{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{DESCRIPTION}}.sql".to_string();

        let repos = [strict, loose];
        let (info, _, matched) = classify_file(&item("dev/v2__shop__drop.sql"), &repos).unwrap();
        assert_eq!(matched.id, 2);
        assert_eq!(info.description, "drop");
    }

    #[test]
    fn test_group_and_sort() {
        let repos = vec![repo(1, "shop", "", false)];
        let items = vec![
            item("dev/v3__shop__migrate__c.sql"),
            item("dev/v1__billing__migrate__a.sql"),
            item("dev/v2__shop__migrate__b.sql"),
            item("unrelated.txt"),
        ];

        let by_repo = group_by_repository(&items, &repos).groups;
        assert_eq!(by_repo.len(), 1);
        assert_eq!(by_repo[0].len(), 3);

        let mut by_db = group_by_database(by_repo.into_iter().next().unwrap());
        assert_eq!(by_db.len(), 2);
        sort_by_schema_version(&mut by_db[0]);
        let versions: Vec<&str> = by_db[0].iter().map(|f| f.migration_info.version.as_str()).collect();
        assert_eq!(versions, vec!["v2", "v3"]);
        assert_eq!(by_db[1][0].migration_info.database, "billing");
    }

    proptest! {
        #[test]
        fn grouping_never_interleaves_databases(
            files in prop::collection::vec((0usize..3, 0u32..20), 1..20)
        ) {
            let databases = ["shop", "billing", "crm"];
            let repos = vec![repo(1, "p", "", false)];
            let items: Vec<DistinctFileItem> = files
                .iter()
                .enumerate()
                .map(|(i, (db, v))| item(&format!("dev/v{:02}__{}__migrate__f{}.sql", v, databases[*db], i)))
                .collect();

            let first = group_by_repository(&items, &repos).groups;
            prop_assert_eq!(first.len(), 1);
            let groups = group_by_database(first.into_iter().next().unwrap());

            let mut seen = std::collections::HashSet::new();
            for mut group in groups {
                let name = group[0].migration_info.database.clone();
                prop_assert!(seen.insert(name.clone()));
                prop_assert!(group.iter().all(|f| f.migration_info.database == name));

                sort_by_schema_version(&mut group);
                prop_assert!(group
                    .windows(2)
                    .all(|w| w[0].migration_info.version <= w[1].migration_info.version));
            }
        }

        #[test]
        fn classification_is_idempotent(version in 1u32..1000, db in "[a-z]{1,8}", desc in "[a-z_]{1,12}") {
            let repos = vec![repo(1, "p", "base", false)];
            let file = item(&format!("base/prod/v{}__{}__data__{}.sql", version, db, desc));
            let first = classify_file(&file, &repos).map(|(i, t, r)| (i, t, r.id));
            let second = classify_file(&file, &repos).map(|(i, t, r)| (i, t, r.id));
            prop_assert_eq!(first, second);
        }
    }
}
