//! Provider-agnostic VCS model.
//!
//! Both provider families (GitHub and GitLab) normalize their webhook payloads
//! into [`PushEvent`] and expose their REST APIs through [`VcsProvider`], so the
//! ingestion pipeline never branches on provider identity.

pub mod github;
pub mod gitlab;
mod middleware;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use middleware::{create_http_client, RequestLogMiddleware};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VcsType {
    #[serde(rename = "GITLAB_SELF_HOST")]
    GitLabSelfHost,
    #[serde(rename = "GITHUB_COM")]
    GitHubCom,
}

impl VcsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VcsType::GitLabSelfHost => "GITLAB_SELF_HOST",
            VcsType::GitHubCom => "GITHUB_COM",
        }
    }
}

impl fmt::Display for VcsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub title: String,
    pub message: String,
    pub created_ts: i64,
    pub url: String,
    pub author_name: String,
    pub author_email: String,
    pub added_list: Vec<String>,
    pub modified_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_list: Vec<String>,
}

/// A push to a branch, normalized across providers.
///
/// Constructed per request and never persisted; it is serialized verbatim into
/// issue and activity payloads so the audit trail shows exactly what was pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub vcs_type: VcsType,
    pub base_directory: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub before: String,
    pub after: String,
    pub repository_id: String,
    pub repository_url: String,
    pub repository_full_path: String,
    pub author_name: String,
    #[serde(rename = "commits")]
    pub commit_list: Vec<Commit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileItemType {
    Added,
    Modified,
    Deleted,
}

/// One changed path across a commit range, tagged with the last commit touching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinctFileItem {
    pub created_ts: i64,
    pub commit: Commit,
    pub file_name: String,
    pub item_type: FileItemType,
    pub is_yaml: bool,
}

impl DistinctFileItem {
    pub fn new(file_name: impl Into<String>, commit: Commit, item_type: FileItemType) -> Self {
        let file_name = file_name.into();
        Self {
            created_ts: commit.created_ts,
            is_yaml: is_yaml_file(&file_name),
            file_name,
            commit,
            item_type,
        }
    }
}

/// Commit title as providers render it: the message's first line.
pub(crate) fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

/// Whether the path opts into the YAML "advanced mode" migration format.
///
/// Only `.yml` counts, since tenant templates are matched with `.sql`
/// rewritten to `.yml`.
pub fn is_yaml_file(file_name: &str) -> bool {
    file_name.ends_with(".yml")
}

impl PushEvent {
    /// Collapse the commit list into one entry per path, keeping commit order.
    ///
    /// A path added in one commit and modified in a later one stays `Added`
    /// but points at the later commit. Paths whose final state is deleted are
    /// dropped.
    pub fn distinct_file_list(&self) -> Vec<DistinctFileItem> {
        let mut items: Vec<DistinctFileItem> = Vec::new();

        for commit in &self.commit_list {
            let changes = commit
                .added_list
                .iter()
                .map(|f| (f, FileItemType::Added))
                .chain(commit.modified_list.iter().map(|f| (f, FileItemType::Modified)))
                .chain(commit.removed_list.iter().map(|f| (f, FileItemType::Deleted)));

            for (file_name, item_type) in changes {
                let mut item = DistinctFileItem::new(file_name.clone(), commit.clone(), item_type);
                match items.iter_mut().find(|existing| existing.file_name == *file_name) {
                    Some(existing) => {
                        if item_type != FileItemType::Deleted
                            && existing.item_type != FileItemType::Deleted
                        {
                            item.item_type = existing.item_type;
                        }
                        *existing = item;
                    }
                    None => items.push(item),
                }
            }
        }

        items.retain(|item| item.item_type != FileItemType::Deleted);
        items
    }

    pub fn last_commit_id(&self) -> Option<&str> {
        self.commit_list.last().map(|c| c.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestFile {
    pub path: String,
    pub last_commit_id: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub last_commit_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDiffType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub diff_type: FileDiffType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    pub last_commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFile {
    pub path: String,
}

/// Provider-neutral webhook registration request.
#[derive(Debug, Clone)]
pub struct WebhookCreate {
    pub url: String,
    pub secret_token: String,
}

/// Called when a provider call rotated the OAuth token pair, so the new pair
/// can be persisted before the next call reads it.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_ts: i64,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct OauthContext {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub refresher: Option<Arc<dyn TokenRefresher>>,
}

impl fmt::Debug for OauthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OauthContext")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("refresher", &self.refresher.is_some())
            .finish()
    }
}

/// The external repository a provider call targets.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryRef<'a> {
    pub oauth: &'a OauthContext,
    pub instance_url: &'a str,
    /// GitHub `owner/name` or GitLab numeric project ID.
    pub repository_id: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: VcsType,
        status: u16,
        message: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("failed to refresh OAuth token: {0}")]
    TokenRefresh(String),
}

impl VcsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VcsError::NotFound(_))
    }
}

/// Capability set every provider family implements.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    fn vcs_type(&self) -> VcsType;

    async fn read_file_content(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError>;

    async fn read_file_meta(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<FileMeta, VcsError>;

    /// Files that differ between two commits.
    async fn get_diff_file_list(
        &self,
        repo: &RepositoryRef<'_>,
        before: &str,
        after: &str,
    ) -> Result<Vec<FileDiff>, VcsError>;

    async fn list_pull_request_files(
        &self,
        repo: &RepositoryRef<'_>,
        pull_request_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError>;

    async fn fetch_commit_by_id(
        &self,
        repo: &RepositoryRef<'_>,
        commit_id: &str,
    ) -> Result<Commit, VcsError>;

    /// Blob paths under `directory` at `git_ref`, recursively.
    async fn fetch_repository_file_list(
        &self,
        repo: &RepositoryRef<'_>,
        git_ref: &str,
        directory: &str,
    ) -> Result<Vec<RepositoryFile>, VcsError>;

    async fn get_branch(
        &self,
        repo: &RepositoryRef<'_>,
        branch: &str,
    ) -> Result<BranchInfo, VcsError>;

    /// Register a push webhook, returning the provider's webhook ID.
    async fn create_webhook(
        &self,
        repo: &RepositoryRef<'_>,
        webhook: &WebhookCreate,
    ) -> Result<String, VcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str, added: &[&str], modified: &[&str], removed: &[&str]) -> Commit {
        Commit {
            id: id.to_string(),
            added_list: added.iter().map(|s| s.to_string()).collect(),
            modified_list: modified.iter().map(|s| s.to_string()).collect(),
            removed_list: removed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn push_event(commits: Vec<Commit>) -> PushEvent {
        PushEvent {
            vcs_type: VcsType::GitHubCom,
            base_directory: String::new(),
            ref_name: "refs/heads/main".to_string(),
            before: "a".to_string(),
            after: "b".to_string(),
            repository_id: "owner/repo".to_string(),
            repository_url: "https://github.com/owner/repo".to_string(),
            repository_full_path: "owner/repo".to_string(),
            author_name: "dev".to_string(),
            commit_list: commits,
        }
    }

    #[test]
    fn test_distinct_file_list_keeps_added_type_and_latest_commit() {
        let event = push_event(vec![
            commit("c1", &["db/v1__shop.sql"], &[], &[]),
            commit("c2", &[], &["db/v1__shop.sql"], &[]),
        ]);

        let files = event.distinct_file_list();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].item_type, FileItemType::Added);
        assert_eq!(files[0].commit.id, "c2");
    }

    #[test]
    fn test_distinct_file_list_preserves_first_seen_order() {
        let event = push_event(vec![
            commit("c1", &["b.sql", "a.sql"], &[], &[]),
            commit("c2", &["c.sql"], &["b.sql"], &[]),
        ]);

        let names: Vec<_> = event
            .distinct_file_list()
            .into_iter()
            .map(|f| f.file_name)
            .collect();
        assert_eq!(names, vec!["b.sql", "a.sql", "c.sql"]);
    }

    #[test]
    fn test_distinct_file_list_drops_deleted_files() {
        let event = push_event(vec![
            commit("c1", &["a.sql", "b.sql"], &[], &[]),
            commit("c2", &[], &[], &["a.sql"]),
        ]);

        let files = event.distinct_file_list();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "b.sql");
    }

    #[test]
    fn test_distinct_file_list_flags_yaml() {
        let event = push_event(vec![commit("c1", &["db/v1__shop.yml", "db/v2.sql"], &[], &[])]);
        let files = event.distinct_file_list();
        assert!(files[0].is_yaml);
        assert!(!files[1].is_yaml);
    }

    #[test]
    fn test_yaml_extension_must_be_yml() {
        assert!(is_yaml_file("db/v1__shop.yml"));
        assert!(!is_yaml_file("db/v1__shop.yaml"));
        assert!(!is_yaml_file("db/v1__shop.yml.sql"));
    }

    #[test]
    fn test_push_event_serializes_with_provider_field_names() {
        let event = push_event(vec![commit("c1", &["a.sql"], &[], &[])]);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["vcsType"], "GITHUB_COM");
        assert_eq!(value["ref"], "refs/heads/main");
        assert_eq!(value["commits"][0]["addedList"][0], "a.sql");
        assert!(value["commits"][0].get("removedList").is_none());
    }

    #[test]
    fn test_oauth_context_debug_redacts_tokens() {
        let ctx = OauthContext {
            client_id: "app".to_string(),
            client_secret: "shh".to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            refresher: None,
        };
        let debug = format!("{:?}", ctx);
        assert!(debug.contains("app"));
        assert!(!debug.contains("shh"));
        assert!(!debug.contains("token\""));
    }
}
