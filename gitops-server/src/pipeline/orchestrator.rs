//! Turns one (repository, database) group of classified files into issues.

use gitops_core::migration::{MigrationInfo, MigrationKind};
use gitops_core::vcs::{FileItemType, PushEvent};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::classify::{FileInfo, FileType};
use crate::databases::find_project_databases;
use crate::error::WebhookError;
use crate::license::Feature;
use crate::model::{
    ActivityCreate, ActivityLevel, IssueCreate, IssueType, MigrationContext, MigrationDetail,
    Repository, RepositoryPushPayload, SchemaChangeType, TaskFind, TaskPatch, TaskStatus, TaskType,
    ACTIVITY_PROJECT_REPOSITORY_PUSH, SYSTEM_BOT_ID,
};
use crate::AppState;

/// What became of one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Migration details to include in an issue.
    Created(Vec<MigrationDetail>),
    /// The file was skipped; `reason` ends up in a WARN activity.
    Ignored { file: String, reason: String },
    /// Existing pending tasks had their statement replaced.
    Patched(usize),
}

impl FileOutcome {
    fn ignored(file: &str, reason: impl Into<String>) -> Self {
        FileOutcome::Ignored {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

/// Body of a YAML migration file in a tenant project.
#[derive(Debug, Deserialize)]
struct MigrationFileYaml {
    #[serde(default)]
    databases: Vec<MigrationFileDatabase>,
    statement: String,
}

#[derive(Debug, Deserialize)]
struct MigrationFileDatabase {
    name: String,
}

/// Creates the issues for one group of files sharing a repository and
/// database name, returning the message shown to the pusher if any issue was
/// created.
///
/// Schema files in an SDL project get an issue each; all migration files are
/// merged into one issue. Recoverable per-file failures are recorded as WARN
/// activities and do not stop the group.
pub async fn process_files_in_project(
    state: &AppState,
    push_event: &PushEvent,
    repo: &Repository,
    files: &[FileInfo],
) -> Result<Option<String>, WebhookError> {
    if repo.project.is_tenant() && !state.license.is_feature_enabled(Feature::MultiTenancy) {
        return Err(WebhookError::Forbidden(Feature::MultiTenancy.access_error_message()));
    }

    let creator_id = issue_creator_id(
        state,
        push_event
            .commit_list
            .first()
            .map(|c| c.author_email.as_str())
            .unwrap_or_default(),
    )
    .await;

    let mut created_issues = Vec::new();
    let mut details = Vec::new();
    let mut file_names = Vec::new();

    for file in files {
        let file_name = file.item.file_name.as_str();
        let outcome = match file.file_type {
            FileType::Schema if repo.project.schema_change_type == SchemaChangeType::Sdl => {
                prepare_from_sdl_file(state, push_event, repo, &file.migration_info, file_name).await
            }
            FileType::Schema => {
                debug!("Ignored schema file {} for non-SDL project", file_name);
                FileOutcome::ignored(file_name, "schema files are only applied in an SDL project")
            }
            // Migration files are accepted in both DDL and SDL projects.
            FileType::Migration => prepare_from_migration_file(state, push_event, repo, file).await,
        };

        match outcome {
            FileOutcome::Created(list) if list.is_empty() => {}
            FileOutcome::Created(list) => match file.file_type {
                FileType::Schema => {
                    let name = format!("[{}] Alter schema", file.migration_info.database);
                    let description =
                        format!("Apply schema diff by file {}", repo.relative_path(file_name));
                    create_issue(state, push_event, repo, creator_id, &name, description, list).await?;
                    created_issues.push(name);
                }
                FileType::Migration => {
                    details.extend(list);
                    file_names.push(repo.relative_path(file_name).to_string());
                }
            },
            FileOutcome::Ignored { file, reason } => {
                record_ignored_file(state, push_event, repo, &file, &reason).await;
            }
            FileOutcome::Patched(count) => {
                debug!("Patched {} task(s) for modified file {}", count, file_name);
            }
        }
    }

    if !details.is_empty() {
        let action = if details.iter().any(|d| d.migration_type == MigrationKind::Migrate) {
            "Alter schema"
        } else {
            "Change data"
        };
        // Files in a group share the database name.
        let name = format!("[{}] {}", files[0].migration_info.database, action);
        let description = format!("By VCS files:\n\n{}\n", file_names.join("\n"));
        create_issue(state, push_event, repo, creator_id, &name, description, details).await?;
        created_issues.push(name);
    }

    if created_issues.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(
        "Created issue \"{}\" from push event",
        created_issues.join(",")
    )))
}

async fn issue_creator_id(state: &AppState, email: &str) -> i64 {
    if email.is_empty() {
        return SYSTEM_BOT_ID;
    }
    match state.store.get_principal_by_email(email).await {
        Ok(Some(principal)) => principal.id,
        Ok(None) => {
            warn!("Principal with committer email {} does not exist, use system bot instead", email);
            SYSTEM_BOT_ID
        }
        Err(e) => {
            warn!("Failed to find the principal with committer email {}, use system bot instead: {}", email, e);
            SYSTEM_BOT_ID
        }
    }
}

/// Reads `file` at the push's last commit.
///
/// The link is re-read first since an earlier call in this push may have
/// rotated its OAuth tokens.
async fn read_file_content(
    state: &AppState,
    push_event: &PushEvent,
    repo: &Repository,
    file: &str,
) -> Result<String, String> {
    let repos = state
        .store
        .find_repositories_by_endpoint(&repo.webhook_endpoint_id)
        .await
        .map_err(|e| format!("get repository by webhook endpoint {:?}: {}", repo.webhook_endpoint_id, e))?;
    let latest = repos
        .iter()
        .find(|r| r.id == repo.id)
        .or_else(|| repos.first())
        .ok_or_else(|| format!("repository not found by webhook endpoint {:?}", repo.webhook_endpoint_id))?;

    let commit_id = push_event.last_commit_id().unwrap_or(push_event.after.as_str());
    let session = state.session(latest).map_err(|e| e.to_string())?;
    session
        .provider
        .read_file_content(&session.target(), file, commit_id)
        .await
        .map_err(|e| format!("read content: {}", e))
}

async fn prepare_from_sdl_file(
    state: &AppState,
    push_event: &PushEvent,
    repo: &Repository,
    schema_info: &MigrationInfo,
    file: &str,
) -> FileOutcome {
    if schema_info.database.is_empty() {
        return FileOutcome::ignored(file, "schema file path has no database name");
    }

    let sdl = match read_file_content(state, push_event, repo, file).await {
        Ok(content) => content,
        Err(e) => return FileOutcome::ignored(file, format!("Failed to read file content: {}", e)),
    };

    if repo.project.is_tenant() {
        return FileOutcome::Created(vec![MigrationDetail {
            migration_type: MigrationKind::MigrateSdl,
            database_id: None,
            database_name: schema_info.database.clone(),
            statement: sdl,
            schema_version: String::new(),
        }]);
    }

    match find_project_databases(
        state.store.as_ref(),
        repo.project.id,
        &schema_info.database,
        &schema_info.environment,
    )
    .await
    {
        Ok(databases) => FileOutcome::Created(
            databases
                .into_iter()
                .map(|db| MigrationDetail {
                    migration_type: MigrationKind::MigrateSdl,
                    database_id: Some(db.id),
                    database_name: String::new(),
                    statement: sdl.clone(),
                    schema_version: String::new(),
                })
                .collect(),
        ),
        Err(e) => FileOutcome::ignored(file, format!("Failed to find project databases: {}", e)),
    }
}

async fn prepare_from_migration_file(
    state: &AppState,
    push_event: &PushEvent,
    repo: &Repository,
    file: &FileInfo,
) -> FileOutcome {
    let file_name = file.item.file_name.as_str();
    let info = &file.migration_info;

    let content = match read_file_content(state, push_event, repo, file_name).await {
        Ok(content) => content,
        Err(e) => return FileOutcome::ignored(file_name, format!("Failed to read file content: {}", e)),
    };

    if repo.project.is_tenant() {
        // Without YAML the whole file is the statement.
        if !file.item.is_yaml {
            return FileOutcome::Created(vec![MigrationDetail {
                migration_type: info.kind,
                database_id: None,
                database_name: info.database.clone(),
                statement: content,
                schema_version: info.version.clone(),
            }]);
        }

        let parsed: MigrationFileYaml = match serde_yaml::from_str(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                return FileOutcome::ignored(file_name, format!("Failed to parse file content as YAML: {}", e))
            }
        };

        let mut details = Vec::new();
        for database in &parsed.databases {
            let databases =
                match find_project_databases(state.store.as_ref(), repo.project.id, &database.name, "").await {
                    Ok(databases) => databases,
                    Err(e) => {
                        return FileOutcome::ignored(
                            file_name,
                            format!("Failed to find project database {:?}: {}", database.name, e),
                        )
                    }
                };
            details.extend(databases.into_iter().map(|db| MigrationDetail {
                migration_type: info.kind,
                database_id: Some(db.id),
                database_name: String::new(),
                statement: parsed.statement.clone(),
                schema_version: info.version.clone(),
            }));
        }
        return FileOutcome::Created(details);
    }

    let databases =
        match find_project_databases(state.store.as_ref(), repo.project.id, &info.database, &info.environment).await {
            Ok(databases) => databases,
            Err(e) => return FileOutcome::ignored(file_name, format!("Failed to find project databases: {}", e)),
        };

    if file.item.item_type == FileItemType::Added {
        return FileOutcome::Created(
            databases
                .into_iter()
                .map(|db| MigrationDetail {
                    migration_type: info.kind,
                    database_id: Some(db.id),
                    database_name: String::new(),
                    statement: content.clone(),
                    schema_version: info.version.clone(),
                })
                .collect(),
        );
    }

    patch_tasks_from_modified_file(state, &databases, file_name, &info.version, content).await
}

/// Replaces the statement of the pending task each database has for
/// `schema_version`, so a fix pushed to a not-yet-run migration takes effect.
async fn patch_tasks_from_modified_file(
    state: &AppState,
    databases: &[crate::model::Database],
    file_name: &str,
    schema_version: &str,
    statement: String,
) -> FileOutcome {
    let mut patched = 0;
    for database in databases {
        let find = TaskFind {
            database_id: Some(database.id),
            status_list: vec![TaskStatus::PendingApproval, TaskStatus::Failed],
            type_list: vec![TaskType::SchemaUpdate, TaskType::DataUpdate],
            schema_version: Some(schema_version.to_string()),
        };
        let tasks = match state.store.find_tasks(&find).await {
            Ok(tasks) => tasks,
            Err(e) => return FileOutcome::ignored(file_name, format!("Failed to find project task: {}", e)),
        };

        let task = match tasks.as_slice() {
            [] => continue,
            [task] => task,
            _ => {
                error!(
                    "Found more than one pending approval or failed tasks for modified VCS file {}, database {}, schema version {}",
                    file_name, database.id, schema_version
                );
                return FileOutcome::Patched(patched);
            }
        };

        let issue = match state.store.get_issue_by_pipeline(task.pipeline_id).await {
            Ok(Some(issue)) => issue,
            Ok(None) => {
                error!("Issue not found by pipeline ID {}", task.pipeline_id);
                return FileOutcome::Patched(patched);
            }
            Err(e) => {
                error!("Failed to get issue by pipeline ID {}: {}", task.pipeline_id, e);
                return FileOutcome::Patched(patched);
            }
        };

        debug!(
            "Patching task {} of issue {} for modified file {}",
            task.id, issue.id, file_name
        );
        let patch = TaskPatch {
            id: task.id,
            updater_id: SYSTEM_BOT_ID,
            statement: Some(statement.clone()),
        };
        if let Err(e) = state.issues.patch_task(task, patch, &issue).await {
            error!(
                "Failed to patch task {} of issue {} with the same migration version: {}",
                task.id, issue.id, e
            );
            return FileOutcome::Patched(patched);
        }
        patched += 1;
    }
    FileOutcome::Patched(patched)
}

fn push_payload(push_event: &PushEvent, issue_id: Option<i64>, issue_name: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RepositoryPushPayload {
        push_event: push_event.clone(),
        issue_id,
        issue_name: issue_name.to_string(),
    })
}

async fn create_issue(
    state: &AppState,
    push_event: &PushEvent,
    repo: &Repository,
    creator_id: i64,
    name: &str,
    description: String,
    details: Vec<MigrationDetail>,
) -> Result<(), WebhookError> {
    let issue_type = if details.iter().any(|d| d.migration_type.is_schema_change()) {
        IssueType::SchemaUpdate
    } else {
        IssueType::DataUpdate
    };
    let create_context = serde_json::to_string(&MigrationContext {
        vcs_push_event: push_event.clone(),
        detail_list: details,
    })
    .map_err(|e| WebhookError::internal("Failed to marshal update schema context", e))?;

    let issue = state
        .issues
        .create_issue(IssueCreate {
            creator_id,
            project_id: repo.project.id,
            name: name.to_string(),
            issue_type,
            description,
            assignee_id: SYSTEM_BOT_ID,
            assignee_need_attention: true,
            create_context,
        })
        .await
        .map_err(|e| {
            let message = match issue_type {
                IssueType::SchemaUpdate => "Failed to create schema update issue",
                IssueType::DataUpdate => "Failed to create data update issue",
            };
            WebhookError::internal(message, e)
        })?;
    info!("Created issue {} {:?} from push event", issue.id, issue.name);

    let payload = push_payload(push_event, Some(issue.id), &issue.name)
        .map_err(|e| WebhookError::internal("Failed to construct activity payload", e))?;
    state
        .activities
        .create_activity(ActivityCreate {
            creator_id,
            container_id: repo.project.id,
            activity_type: ACTIVITY_PROJECT_REPOSITORY_PUSH,
            level: ActivityLevel::Info,
            comment: format!("Created issue \"{}\".", issue.name),
            payload,
        })
        .await
        .map_err(|e| {
            WebhookError::internal(
                format!(
                    "Failed to create project activity after creating issue from repository push event: {}",
                    issue.id
                ),
                e,
            )
        })?;
    Ok(())
}

pub(crate) async fn record_ignored_file(state: &AppState, push_event: &PushEvent, repo: &Repository, file: &str, reason: &str) {
    warn!("Ignored file {}: {}", file, reason);

    let payload = match push_payload(push_event, None, "") {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to construct project activity payload for the ignored repository file: {}", e);
            return;
        }
    };
    let activity = ActivityCreate {
        creator_id: SYSTEM_BOT_ID,
        container_id: repo.project.id,
        activity_type: ACTIVITY_PROJECT_REPOSITORY_PUSH,
        level: ActivityLevel::Warn,
        comment: format!("Ignored file \"{}\", {}.", file, reason),
        payload,
    };
    if let Err(e) = state.activities.create_activity(activity).await {
        warn!("Failed to create project activity for the ignored repository file: {}", e);
    }
}
