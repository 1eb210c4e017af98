//! The push pipeline: from a normalized push event to created issues.

pub mod classify;
pub mod diff;
pub mod orchestrator;

use gitops_core::vcs::PushEvent;
use tracing::{debug, error, warn};

use self::diff::DiffError;
use crate::error::WebhookError;
use crate::model::Repository;
use crate::AppState;

/// Runs a push against the links that accepted it and returns one message per
/// group that produced issues.
///
/// `repositories` must be non-empty and share one external repository. A
/// group that fails is logged and skipped, except for license errors, which
/// fail the whole push. Files the pipeline cannot process, including every
/// file of a push whose diff cannot be fetched, are recorded as ignored.
pub async fn process_push_event(
    state: &AppState,
    repositories: &[Repository],
    push_event: &PushEvent,
) -> Result<Vec<String>, WebhookError> {
    let Some(first) = repositories.first() else {
        return Ok(Vec::new());
    };

    let distinct = push_event.distinct_file_list();
    if distinct.is_empty() {
        warn!("No files found from the push event for repository {}", first.external_id);
        return Ok(Vec::new());
    }

    let files = match diff::filter_files_by_commits_diff(state, first, &distinct, &push_event.before, &push_event.after)
        .await
    {
        Ok(files) => files,
        Err(DiffError::Session(e)) => return Err(e),
        Err(e @ DiffError::Provider(_)) => {
            let reason = e.to_string();
            for file in &distinct {
                let repo = repositories
                    .iter()
                    .find(|r| file.file_name.starts_with(&r.base_directory))
                    .unwrap_or(first);
                orchestrator::record_ignored_file(state, push_event, repo, &file.file_name, &reason).await;
            }
            return Ok(Vec::new());
        }
    };
    if files.is_empty() {
        debug!("No file changed between {} and {}", push_event.before, push_event.after);
        return Ok(Vec::new());
    }

    let grouping = classify::group_by_repository(&files, repositories);
    for ignored in &grouping.ignored {
        if let Some(repo) = repositories.iter().find(|r| r.id == ignored.repository_id) {
            orchestrator::record_ignored_file(state, push_event, repo, &ignored.file, &ignored.reason).await;
        }
    }

    let mut messages = Vec::new();
    for repo_files in grouping.groups {
        let repo = repo_files[0].repository.clone();
        let mut event = push_event.clone();
        event.vcs_type = repo.vcs.as_ref().map(|v| v.vcs_type).unwrap_or(push_event.vcs_type);
        event.base_directory = repo.base_directory.clone();

        for mut db_files in classify::group_by_database(repo_files) {
            classify::sort_by_schema_version(&mut db_files);
            match orchestrator::process_files_in_project(state, &event, &repo, &db_files).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(e @ WebhookError::Forbidden(_)) => return Err(e),
                Err(e) => error!(
                    "Failed to process files for project {} database {:?}: {}",
                    repo.project.id, db_files[0].migration_info.database, e
                ),
            }
        }
    }
    Ok(messages)
}
