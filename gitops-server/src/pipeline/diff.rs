//! Narrows a push's file list to what really changed between its endpoints.
//!
//! A push can carry commits merged in from other branches that the target
//! branch already had, so the commit file lists alone overstate the change.

use gitops_core::vcs::{DistinctFileItem, FileDiff, VcsError};

use crate::error::WebhookError;
use crate::model::Repository;
use crate::AppState;

/// Keeps the items whose path appears in `diffs`, preserving item order.
pub fn intersect_with_diff(files: Vec<DistinctFileItem>, diffs: &[FileDiff]) -> Vec<DistinctFileItem> {
    files
        .into_iter()
        .filter(|file| diffs.iter().any(|diff| diff.path == file.file_name))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error(transparent)]
    Session(#[from] WebhookError),

    /// The provider call failed; the files can still be reported as ignored.
    #[error("Failed to get file diff list: {0}")]
    Provider(#[from] VcsError),
}

pub async fn filter_files_by_commits_diff(
    state: &AppState,
    repo: &Repository,
    files: &[DistinctFileItem],
    before: &str,
    after: &str,
) -> Result<Vec<DistinctFileItem>, DiffError> {
    let session = state.session(repo)?;
    let diffs = session
        .provider
        .get_diff_file_list(&session.target(), before, after)
        .await?;
    Ok(intersect_with_diff(files.to_vec(), &diffs))
}
