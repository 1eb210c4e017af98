//! GitLab webhook payloads.

mod client;

use serde::Deserialize;

use super::{first_line, Commit, PushEvent, VcsError, VcsType};

pub use client::GitLabProvider;

pub const TOKEN_HEADER: &str = "x-gitlab-token";
pub const PUSH_OBJECT_KIND: &str = "push";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookProject {
    pub id: i64,
    pub web_url: String,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCommit {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub message: String,
    pub timestamp: String,
    pub url: String,
    pub author: WebhookCommitAuthor,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Only `object_kind` is required so that non-push events can be
/// recognised and acknowledged without matching the push shape.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub object_kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPushEvent {
    pub object_kind: String,
    pub before: String,
    pub after: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub user_name: String,
    pub project: WebhookProject,
    #[serde(default)]
    pub commits: Vec<WebhookCommit>,
}

impl WebhookPushEvent {
    /// Links store the numeric GitLab project ID as a string.
    pub fn repository_id(&self) -> String {
        self.project.id.to_string()
    }

    pub fn to_push_event(&self) -> Result<PushEvent, VcsError> {
        let mut commit_list = Vec::with_capacity(self.commits.len());
        for c in &self.commits {
            let created = chrono::DateTime::parse_from_rfc3339(&c.timestamp).map_err(|e| {
                VcsError::Decode(format!(
                    "commit {} has invalid timestamp {:?}: {}",
                    c.id, c.timestamp, e
                ))
            })?;
            let title = if c.title.is_empty() {
                first_line(&c.message).to_string()
            } else {
                c.title.clone()
            };

            commit_list.push(Commit {
                id: c.id.clone(),
                title,
                message: c.message.clone(),
                created_ts: created.timestamp(),
                url: c.url.clone(),
                author_name: c.author.name.clone(),
                author_email: c.author.email.clone(),
                added_list: c.added.clone(),
                modified_list: c.modified.clone(),
                removed_list: c.removed.clone(),
            });
        }

        Ok(PushEvent {
            vcs_type: VcsType::GitLabSelfHost,
            base_directory: String::new(),
            ref_name: self.ref_name.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            repository_id: self.repository_id(),
            repository_url: self.project.web_url.clone(),
            repository_full_path: self.project.path_with_namespace.clone(),
            author_name: self.user_name.clone(),
            commit_list,
        })
    }
}
