//! Matches an inbound webhook to the repository links it is meant for.

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::error::WebhookError;
use crate::model::{Repository, RowStatus};
use crate::store::Store;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Links sharing `endpoint_id` that belong to `external_id` and pass `accept`.
///
/// Archived projects and links without a resolved VCS are skipped. An error
/// from `accept` aborts the whole lookup.
pub async fn filter_repositories<F>(
    store: &dyn Store,
    endpoint_id: &str,
    external_id: &str,
    mut accept: F,
) -> Result<Vec<Repository>, WebhookError>
where
    F: FnMut(&Repository) -> Result<bool, WebhookError>,
{
    let repos = store
        .find_repositories_by_endpoint(endpoint_id)
        .await
        .map_err(|e| {
            WebhookError::internal(
                format!("Failed to respond webhook event for endpoint: {}", endpoint_id),
                e,
            )
        })?;
    if repos.is_empty() {
        return Err(WebhookError::NotFound(format!(
            "Repository for webhook endpoint {} not found",
            endpoint_id
        )));
    }

    let mut filtered = Vec::new();
    for repo in repos {
        if repo.project.row_status == RowStatus::Archived {
            debug!(
                "Skip repository {} ({}) as the associated project is archived",
                repo.id, repo.external_id
            );
            continue;
        }
        if repo.vcs.is_none() {
            debug!("Skip repository {} due to missing VCS", repo.id);
            continue;
        }
        if repo.external_id != external_id {
            debug!(
                "Skip repository {} due to external ID mismatch: event {}, repository {}",
                repo.id, external_id, repo.external_id
            );
            continue;
        }
        if !accept(&repo)? {
            debug!("Skip repository {} as the webhook was not accepted", repo.id);
            continue;
        }
        filtered.push(repo);
    }
    Ok(filtered)
}

/// Branch name of a `refs/heads/<branch>` ref.
pub fn parse_branch_name_from_ref(ref_name: &str) -> Option<&str> {
    ref_name
        .strip_prefix(BRANCH_REF_PREFIX)
        .filter(|branch| !branch.is_empty())
}

/// Whether a push to `ref_name` should be handled by a link with `branch_filter`.
///
/// The filter is a shell glob where `*` does not cross `/`.
pub fn is_webhook_event_branch(ref_name: &str, branch_filter: &str) -> Result<bool, WebhookError> {
    let branch = parse_branch_name_from_ref(ref_name).ok_or_else(|| {
        WebhookError::BadRequest(format!(
            "Invalid ref: {}, expected prefix {}",
            ref_name, BRANCH_REF_PREFIX
        ))
    })?;

    let pattern = Pattern::new(branch_filter)
        .map_err(|e| WebhookError::internal("failed to match branch filter", e))?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    if !pattern.matches_with(branch, options) {
        debug!(
            "Skip repository due to branch filter mismatch: branch {}, filter {}",
            branch, branch_filter
        );
        return Ok(false);
    }
    Ok(true)
}
