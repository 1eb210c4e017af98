use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::vcs::{
    first_line, BranchInfo, Commit, FileDiff, FileDiffType, FileMeta, PullRequestFile, RepositoryFile,
    RepositoryRef, VcsError, VcsProvider, VcsType, WebhookCreate,
};

const GITHUB_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct GitHubProvider {
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    name: String,
    path: String,
    size: i64,
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    head: PullRequestRefResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestRefResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFileResponse {
    filename: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    html_url: String,
    commit: CommitDetail,
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: String,
    email: String,
    date: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Serialize)]
struct WebhookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    secret: &'a str,
    insecure_ssl: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateWebhookRequest<'a> {
    config: WebhookConfig<'a>,
    events: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    id: i64,
}

impl GitHubProvider {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    /// github.com is served from api.github.com; Enterprise hosts serve the
    /// same API under `/api/v3`.
    fn api_url(instance_url: &str) -> String {
        let instance_url = instance_url.trim_end_matches('/');
        if instance_url.is_empty() || instance_url == "https://github.com" {
            GITHUB_API_URL.to_string()
        } else {
            format!("{}/api/v3", instance_url)
        }
    }

    fn repo_url(repo: &RepositoryRef<'_>, path: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            Self::api_url(repo.instance_url),
            repo.repository_id,
            path
        )
    }

    fn authorized(&self, builder: RequestBuilder, repo: &RepositoryRef<'_>) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", repo.oauth.access_token))
            .header("Accept", "application/vnd.github.v3+json")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        repo: &RepositoryRef<'_>,
        url: &str,
        what: &str,
    ) -> Result<T, VcsError> {
        let response = self
            .authorized(self.client.get(url), repo)
            .send()
            .await?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| VcsError::Decode(format!("{}: {}", what, e)))
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, VcsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(VcsError::NotFound(what.to_string()));
    }
    let message = response.text().await.unwrap_or_default();
    Err(VcsError::Api {
        provider: VcsType::GitHubCom,
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl VcsProvider for GitHubProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::GitHubCom
    }

    async fn read_file_content(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError> {
        let url = format!(
            "{}?ref={}",
            Self::repo_url(repo, &format!("contents/{}", file_path)),
            git_ref
        );
        debug!("Reading {} at {} from {}", file_path, git_ref, repo.repository_id);

        let contents: ContentsResponse = self
            .get_json(repo, &url, &format!("file {}", file_path))
            .await?;

        // GitHub wraps the base64 payload at 60 columns.
        let encoded: String = contents.content.split_whitespace().collect();
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| VcsError::Decode(format!("file {}: {}", file_path, e)))?;
        String::from_utf8(bytes)
            .map_err(|e| VcsError::Decode(format!("file {}: {}", file_path, e)))
    }

    async fn read_file_meta(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<FileMeta, VcsError> {
        let url = format!(
            "{}?ref={}",
            Self::repo_url(repo, &format!("contents/{}", file_path)),
            git_ref
        );
        let contents: ContentsResponse = self
            .get_json(repo, &url, &format!("file {}", file_path))
            .await?;

        Ok(FileMeta {
            name: contents.name,
            path: contents.path,
            size: contents.size,
            last_commit_id: contents.sha,
        })
    }

    async fn get_diff_file_list(
        &self,
        repo: &RepositoryRef<'_>,
        before: &str,
        after: &str,
    ) -> Result<Vec<FileDiff>, VcsError> {
        let url = Self::repo_url(repo, &format!("compare/{}...{}", before, after));
        info!("Fetching changed files from {}...{}", before, after);

        let compare: CompareResponse = self
            .get_json(repo, &url, &format!("compare {}...{}", before, after))
            .await?;

        Ok(compare
            .files
            .into_iter()
            .map(|f| FileDiff {
                diff_type: diff_type(&f.status),
                path: f.filename,
            })
            .collect())
    }

    async fn list_pull_request_files(
        &self,
        repo: &RepositoryRef<'_>,
        pull_request_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        let pr: PullRequestResponse = self
            .get_json(
                repo,
                &Self::repo_url(repo, &format!("pulls/{}", pull_request_id)),
                &format!("pull request {}", pull_request_id),
            )
            .await?;

        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}?per_page={}&page={}",
                Self::repo_url(repo, &format!("pulls/{}/files", pull_request_id)),
                PAGE_SIZE,
                page
            );
            let batch: Vec<PullRequestFileResponse> = self
                .get_json(repo, &url, &format!("pull request {} files", pull_request_id))
                .await?;
            let batch_len = batch.len();

            files.extend(batch.into_iter().map(|f| PullRequestFile {
                is_deleted: f.status == "removed",
                path: f.filename,
                last_commit_id: pr.head.sha.clone(),
            }));

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        info!(
            "Pull request {} in {} touches {} files",
            pull_request_id,
            repo.repository_id,
            files.len()
        );
        Ok(files)
    }

    async fn fetch_commit_by_id(
        &self,
        repo: &RepositoryRef<'_>,
        commit_id: &str,
    ) -> Result<Commit, VcsError> {
        let response: CommitResponse = self
            .get_json(
                repo,
                &Self::repo_url(repo, &format!("commits/{}", commit_id)),
                &format!("commit {}", commit_id),
            )
            .await?;

        let mut added_list = Vec::new();
        let mut modified_list = Vec::new();
        for file in response.files {
            match diff_type(&file.status) {
                FileDiffType::Added => added_list.push(file.filename),
                FileDiffType::Modified => modified_list.push(file.filename),
                FileDiffType::Removed => {}
            }
        }

        Ok(Commit {
            id: response.sha,
            title: first_line(&response.commit.message).to_string(),
            created_ts: chrono::DateTime::parse_from_rfc3339(&response.commit.author.date)
                .map(|t| t.timestamp())
                .unwrap_or_default(),
            message: response.commit.message,
            url: response.html_url,
            author_name: response.commit.author.name,
            author_email: response.commit.author.email,
            added_list,
            modified_list,
            removed_list: Vec::new(),
        })
    }

    async fn fetch_repository_file_list(
        &self,
        repo: &RepositoryRef<'_>,
        git_ref: &str,
        directory: &str,
    ) -> Result<Vec<RepositoryFile>, VcsError> {
        let url = format!(
            "{}?recursive=true",
            Self::repo_url(repo, &format!("git/trees/{}", git_ref))
        );
        let tree: TreeResponse = self
            .get_json(repo, &url, &format!("tree {}", git_ref))
            .await?;

        let prefix = directory.trim_matches('/');
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .filter(|entry| {
                prefix.is_empty()
                    || entry
                        .path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|entry| RepositoryFile { path: entry.path })
            .collect())
    }

    async fn get_branch(
        &self,
        repo: &RepositoryRef<'_>,
        branch: &str,
    ) -> Result<BranchInfo, VcsError> {
        let response: BranchResponse = self
            .get_json(
                repo,
                &Self::repo_url(repo, &format!("branches/{}", branch)),
                &format!("branch {}", branch),
            )
            .await?;

        Ok(BranchInfo {
            name: response.name,
            last_commit_id: response.commit.sha,
        })
    }

    async fn create_webhook(
        &self,
        repo: &RepositoryRef<'_>,
        webhook: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let request = CreateWebhookRequest {
            config: WebhookConfig {
                url: &webhook.url,
                content_type: "json",
                secret: &webhook.secret_token,
                // Self-hosted callers frequently sit behind private CAs.
                insecure_ssl: "1",
            },
            events: vec!["push"],
        };

        let response = self
            .authorized(self.client.post(Self::repo_url(repo, "hooks")), repo)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response, "webhook").await?;
        let created: WebhookResponse = response
            .json()
            .await
            .map_err(|e| VcsError::Decode(format!("webhook: {}", e)))?;

        info!("Created GitHub webhook {} for {}", created.id, repo.repository_id);
        Ok(created.id.to_string())
    }
}

fn diff_type(status: &str) -> FileDiffType {
    match status {
        "added" => FileDiffType::Added,
        "removed" => FileDiffType::Removed,
        _ => FileDiffType::Modified,
    }
}
