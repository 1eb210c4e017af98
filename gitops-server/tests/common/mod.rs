#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gitops_core::vcs::{
    BranchInfo, Commit, FileDiff, FileDiffType, FileMeta, PullRequestFile, RepositoryFile, RepositoryRef,
    VcsError, VcsProvider, VcsType, WebhookCreate,
};
use gitops_server::config::{Config, Profile, ReleaseMode};
use gitops_server::store::{InMemoryStore, StoreSeed};
use gitops_server::{build_router, AppState, VcsProviders};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

pub const WORKSPACE_ID: &str = "ws";
pub const EXTERNAL_URL: &str = "https://bb.example.com";

/// A provider serving canned answers and recording what it was asked.
#[derive(Default)]
pub struct FakeProvider {
    pub vcs_type: Option<VcsType>,
    pub files: HashMap<String, String>,
    pub failing_reads: HashSet<String>,
    pub failing_diff: bool,
    pub diff: Vec<FileDiff>,
    pub pr_files: Vec<PullRequestFile>,
    pub repository_files: Vec<RepositoryFile>,
    pub commits: HashMap<String, Commit>,
    pub branches: HashSet<String>,
    pub reads: Mutex<Vec<(String, String)>>,
    pub created_webhooks: Mutex<Vec<WebhookCreate>>,
}

impl FakeProvider {
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_diff(mut self, paths: &[&str]) -> Self {
        self.diff = paths
            .iter()
            .map(|p| FileDiff {
                path: p.to_string(),
                diff_type: FileDiffType::Added,
            })
            .collect();
        self
    }

    pub fn reads(&self) -> Vec<(String, String)> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl VcsProvider for FakeProvider {
    fn vcs_type(&self) -> VcsType {
        self.vcs_type.unwrap_or(VcsType::GitHubCom)
    }

    async fn read_file_content(
        &self,
        _repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError> {
        self.reads
            .lock()
            .unwrap()
            .push((file_path.to_string(), git_ref.to_string()));
        if self.failing_reads.contains(file_path) {
            return Err(VcsError::Api {
                provider: self.vcs_type(),
                status: 502,
                message: "upstream unavailable".to_string(),
            });
        }
        self.files
            .get(file_path)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("file {}", file_path)))
    }

    async fn read_file_meta(
        &self,
        _repo: &RepositoryRef<'_>,
        file_path: &str,
        _git_ref: &str,
    ) -> Result<FileMeta, VcsError> {
        let content = self
            .files
            .get(file_path)
            .ok_or_else(|| VcsError::NotFound(format!("file {}", file_path)))?;
        Ok(FileMeta {
            name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
            path: file_path.to_string(),
            size: content.len() as i64,
            last_commit_id: "c-latest".to_string(),
        })
    }

    async fn get_diff_file_list(
        &self,
        _repo: &RepositoryRef<'_>,
        _before: &str,
        _after: &str,
    ) -> Result<Vec<FileDiff>, VcsError> {
        if self.failing_diff {
            return Err(VcsError::Api {
                provider: self.vcs_type(),
                status: 429,
                message: "rate limited".to_string(),
            });
        }
        Ok(self.diff.clone())
    }

    async fn list_pull_request_files(
        &self,
        _repo: &RepositoryRef<'_>,
        _pull_request_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        Ok(self.pr_files.clone())
    }

    async fn fetch_commit_by_id(&self, _repo: &RepositoryRef<'_>, commit_id: &str) -> Result<Commit, VcsError> {
        self.commits
            .get(commit_id)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("commit {}", commit_id)))
    }

    async fn fetch_repository_file_list(
        &self,
        _repo: &RepositoryRef<'_>,
        _git_ref: &str,
        directory: &str,
    ) -> Result<Vec<RepositoryFile>, VcsError> {
        Ok(self
            .repository_files
            .iter()
            .filter(|f| f.path.starts_with(directory))
            .cloned()
            .collect())
    }

    async fn get_branch(&self, _repo: &RepositoryRef<'_>, branch: &str) -> Result<BranchInfo, VcsError> {
        if !self.branches.contains(branch) {
            return Err(VcsError::NotFound(format!("branch {}", branch)));
        }
        Ok(BranchInfo {
            name: branch.to_string(),
            last_commit_id: "c-head".to_string(),
        })
    }

    async fn create_webhook(&self, _repo: &RepositoryRef<'_>, webhook: &WebhookCreate) -> Result<String, VcsError> {
        let mut created = self.created_webhooks.lock().unwrap();
        created.push(webhook.clone());
        Ok(format!("hook-{}", created.len()))
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<FakeProvider>,
}

pub fn config() -> Config {
    Config {
        port: 3000,
        profile: Profile {
            external_url: EXTERNAL_URL.to_string(),
            workspace_id: WORKSPACE_ID.to_string(),
            mode: ReleaseMode::Prod,
        },
        license_multi_tenancy: true,
        sql_review_fail_on_error: false,
        store_seed_path: None,
        admin_auth_token: Some("admin-token".to_string()),
    }
}

impl TestApp {
    pub fn new(seed: serde_json::Value, provider: FakeProvider) -> Self {
        Self::with_config(config(), seed, provider)
    }

    pub fn with_config(config: Config, seed: serde_json::Value, provider: FakeProvider) -> Self {
        let seed: StoreSeed = serde_json::from_value(seed).expect("seed should deserialize");
        let store = Arc::new(InMemoryStore::from_seed(seed));
        let provider = Arc::new(provider);
        let providers = VcsProviders::new(provider.clone(), provider.clone());
        let state = Arc::new(AppState::with_memory_store(&config, Arc::clone(&store), providers));
        Self { state, store, provider }
    }

    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// Sends one request and returns the status with the JSON body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}

pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn github_push_request(endpoint: &str, secret: &str, body: &serde_json::Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/github/{}", endpoint))
        .header("content-type", "application/json")
        .header("x-github-event", "push")
        .header("x-hub-signature-256", sign(secret, &bytes))
        .body(Body::from(bytes))
        .unwrap()
}

pub fn github_push_body(added: &[&str], modified: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "ref": "refs/heads/main",
        "before": "A",
        "after": "B",
        "repository": {
            "id": 1,
            "full_name": "acme/shop",
            "html_url": "https://github.com/acme/shop"
        },
        "sender": {"login": "dev"},
        "commits": [{
            "id": "B",
            "distinct": true,
            "message": "Add column",
            "timestamp": "2024-05-01T10:00:00+02:00",
            "url": "https://github.com/acme/shop/commit/B",
            "author": {"name": "Dev", "email": "dev@example.com"},
            "added": added,
            "modified": modified,
            "removed": []
        }]
    })
}

/// One GitHub-linked project with a `dev` database named `shop`.
pub fn github_seed(schema_change_type: &str, schema_path_template: &str) -> serde_json::Value {
    serde_json::json!({
        "projects": [{
            "id": 101,
            "name": "shop",
            "workflowType": "VCS",
            "schemaChangeType": schema_change_type
        }],
        "vcs": [{"id": 1, "type": "GITHUB_COM", "instanceUrl": "https://github.com"}],
        "repositories": [{
            "id": 201,
            "projectId": 101,
            "vcsId": 1,
            "name": "shop",
            "webUrl": "https://github.com/acme/shop",
            "externalId": "acme/shop",
            "branchFilter": "main",
            "baseDirectory": "migrations",
            "filePathTemplate": "{{ENV_NAME}}/{{VERSION}}__{{DB_NAME}}__{{DESCRIPTION}}.sql",
            "schemaPathTemplate": schema_path_template,
            "sheetPathTemplate": "sheets/{{ENV_NAME}}__{{DB_NAME}}__{{NAME}}.sql",
            "webhookEndpointId": "ws-1",
            "webhookSecretToken": "s3cret",
            "enableSQLReviewCI": true
        }],
        "databases": [{
            "id": 301,
            "name": "shop",
            "projectId": 101,
            "characterSet": "utf8mb4",
            "collation": "utf8mb4_general_ci",
            "instance": {"id": 401, "engine": "MYSQL", "environment": {"id": 501, "name": "dev"}}
        }]
    })
}
