//! GitHub webhook payloads and signature validation.

mod client;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{first_line, Commit, PushEvent, VcsType};

pub use client::GitHubProvider;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

type HmacSha256 = Hmac<Sha256>;

/// Value of the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookType {
    Ping,
    Push,
    Other(String),
}

impl WebhookType {
    pub fn from_header(value: &str) -> Self {
        match value {
            "ping" => WebhookType::Ping,
            "push" => WebhookType::Push,
            other => WebhookType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRepository {
    pub id: i64,
    pub full_name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSender {
    pub login: String,
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
    pub distinct: bool,
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

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPushEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub before: String,
    pub after: String,
    pub repository: WebhookRepository,
    pub sender: WebhookSender,
    #[serde(default)]
    pub commits: Vec<WebhookCommit>,
}

impl WebhookPushEvent {
    /// GitHub identifies repositories by `owner/name`, which is what links store.
    pub fn repository_id(&self) -> &str {
        &self.repository.full_name
    }

    /// Commit timestamps GitHub sends are ISO 8601 with an offset; an
    /// unparseable one is recorded as 0 rather than rejecting the push.
    pub fn to_push_event(&self) -> PushEvent {
        let commit_list = self
            .commits
            .iter()
            .map(|c| Commit {
                id: c.id.clone(),
                title: first_line(&c.message).to_string(),
                message: c.message.clone(),
                created_ts: chrono::DateTime::parse_from_rfc3339(&c.timestamp)
                    .map(|t| t.timestamp())
                    .unwrap_or_default(),
                url: c.url.clone(),
                author_name: c.author.name.clone(),
                author_email: c.author.email.clone(),
                added_list: c.added.clone(),
                modified_list: c.modified.clone(),
                removed_list: c.removed.clone(),
            })
            .collect();

        PushEvent {
            vcs_type: VcsType::GitHubCom,
            base_directory: String::new(),
            ref_name: self.ref_name.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            repository_id: self.repository.full_name.clone(),
            repository_url: self.repository.html_url.clone(),
            repository_full_path: self.repository.full_name.clone(),
            author_name: self.sender.login.clone(),
            commit_list,
        }
    }
}

/// Checks an `X-Hub-Signature-256` header against the raw body.
///
/// The `sha256=` prefix is optional. Comparison is constant time.
pub fn validate_signature_256(signature: &str, secret: &str, body: &[u8]) -> bool {
    let signature_hex = signature.strip_prefix("sha256=").unwrap_or(signature);

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);

    mac.verify_slice(&signature_bytes).is_ok()
}
