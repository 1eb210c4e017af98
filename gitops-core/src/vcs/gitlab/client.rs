use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::vcs::{
    first_line, BranchInfo, Commit, FileDiff, FileDiffType, FileMeta, PullRequestFile,
    RepositoryFile, RepositoryRef, VcsError, VcsProvider, VcsType, WebhookCreate,
};

const PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct GitLabProvider {
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct FileMetaResponse {
    file_name: String,
    file_path: String,
    size: i64,
    last_commit_id: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    diffs: Vec<DiffEntry>,
}

#[derive(Debug, Deserialize)]
struct DiffEntry {
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct MergeRequestChanges {
    sha: String,
    #[serde(default)]
    changes: Vec<DiffEntry>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
    title: String,
    message: String,
    created_at: String,
    web_url: String,
    author_name: String,
    author_email: String,
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
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateWebhookRequest<'a> {
    url: &'a str,
    token: &'a str,
    push_events: bool,
    enable_ssl_verification: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    id: i64,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    created_at: i64,
}

impl GitLabProvider {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    fn project_url(repo: &RepositoryRef<'_>, path: &str) -> String {
        format!(
            "{}/api/v4/projects/{}/{}",
            repo.instance_url.trim_end_matches('/'),
            urlencoding::encode(repo.repository_id),
            path
        )
    }

    /// Sends the request built by `build`, refreshing the OAuth token once if
    /// GitLab answers 401 and a refresh token is available.
    async fn send<F>(
        &self,
        repo: &RepositoryRef<'_>,
        what: &str,
        build: F,
    ) -> Result<reqwest::Response, VcsError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = build()
            .header("Authorization", format!("Bearer {}", repo.oauth.access_token))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && !repo.oauth.refresh_token.is_empty() {
            warn!("GitLab rejected the access token for {}, refreshing", what);
            let token = self.refresh_token(repo).await?;
            let response = build()
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await?;
            return check_status(response, what).await;
        }

        check_status(response, what).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        repo: &RepositoryRef<'_>,
        url: &str,
        what: &str,
    ) -> Result<T, VcsError> {
        let response = self.send(repo, what, || self.client.get(url)).await?;
        response
            .json()
            .await
            .map_err(|e| VcsError::Decode(format!("{}: {}", what, e)))
    }

    async fn refresh_token(&self, repo: &RepositoryRef<'_>) -> Result<String, VcsError> {
        let url = format!("{}/oauth/token", repo.instance_url.trim_end_matches('/'));
        let request = RefreshTokenRequest {
            grant_type: "refresh_token",
            refresh_token: &repo.oauth.refresh_token,
            client_id: &repo.oauth.client_id,
            client_secret: &repo.oauth.client_secret,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VcsError::TokenRefresh(format!("{} - {}", status, body)));
        }
        let refreshed: RefreshTokenResponse = response
            .json()
            .await
            .map_err(|e| VcsError::TokenRefresh(e.to_string()))?;

        let expires_ts = if refreshed.expires_in > 0 {
            refreshed.created_at + refreshed.expires_in
        } else {
            0
        };

        if let Some(refresher) = &repo.oauth.refresher {
            refresher
                .refresh(&refreshed.access_token, &refreshed.refresh_token, expires_ts)
                .await
                .map_err(|e| VcsError::TokenRefresh(format!("{:#}", e)))?;
        }

        info!("Refreshed GitLab OAuth token for project {}", repo.repository_id);
        Ok(refreshed.access_token)
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
        provider: VcsType::GitLabSelfHost,
        status: status.as_u16(),
        message,
    })
}

fn diff_type(entry: &DiffEntry) -> FileDiffType {
    if entry.deleted_file {
        FileDiffType::Removed
    } else if entry.new_file {
        FileDiffType::Added
    } else {
        FileDiffType::Modified
    }
}

#[async_trait]
impl VcsProvider for GitLabProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::GitLabSelfHost
    }

    async fn read_file_content(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError> {
        let url = format!(
            "{}?ref={}",
            Self::project_url(
                repo,
                &format!("repository/files/{}/raw", urlencoding::encode(file_path))
            ),
            urlencoding::encode(git_ref)
        );
        debug!("Reading {} at {} from project {}", file_path, git_ref, repo.repository_id);

        let what = format!("file {}", file_path);
        let response = self.send(repo, &what, || self.client.get(&url)).await?;
        response
            .text()
            .await
            .map_err(|e| VcsError::Decode(format!("{}: {}", what, e)))
    }

    async fn read_file_meta(
        &self,
        repo: &RepositoryRef<'_>,
        file_path: &str,
        git_ref: &str,
    ) -> Result<FileMeta, VcsError> {
        let url = format!(
            "{}?ref={}",
            Self::project_url(
                repo,
                &format!("repository/files/{}", urlencoding::encode(file_path))
            ),
            urlencoding::encode(git_ref)
        );
        let meta: FileMetaResponse = self
            .get_json(repo, &url, &format!("file {}", file_path))
            .await?;

        Ok(FileMeta {
            name: meta.file_name,
            path: meta.file_path,
            size: meta.size,
            last_commit_id: meta.last_commit_id,
        })
    }

    async fn get_diff_file_list(
        &self,
        repo: &RepositoryRef<'_>,
        before: &str,
        after: &str,
    ) -> Result<Vec<FileDiff>, VcsError> {
        let url = format!(
            "{}?from={}&to={}",
            Self::project_url(repo, "repository/compare"),
            before,
            after
        );
        info!("Fetching changed files from {}...{}", before, after);

        let compare: CompareResponse = self
            .get_json(repo, &url, &format!("compare {}...{}", before, after))
            .await?;

        Ok(compare
            .diffs
            .iter()
            .map(|d| FileDiff {
                path: d.new_path.clone(),
                diff_type: diff_type(d),
            })
            .collect())
    }

    async fn list_pull_request_files(
        &self,
        repo: &RepositoryRef<'_>,
        pull_request_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        let url = Self::project_url(repo, &format!("merge_requests/{}/changes", pull_request_id));
        let mr: MergeRequestChanges = self
            .get_json(repo, &url, &format!("merge request {}", pull_request_id))
            .await?;

        info!(
            "Merge request {} in project {} touches {} files",
            pull_request_id,
            repo.repository_id,
            mr.changes.len()
        );
        Ok(mr
            .changes
            .into_iter()
            .map(|change| PullRequestFile {
                path: change.new_path,
                last_commit_id: mr.sha.clone(),
                is_deleted: change.deleted_file,
            })
            .collect())
    }

    async fn fetch_commit_by_id(
        &self,
        repo: &RepositoryRef<'_>,
        commit_id: &str,
    ) -> Result<Commit, VcsError> {
        let what = format!("commit {}", commit_id);
        let commit: CommitResponse = self
            .get_json(
                repo,
                &Self::project_url(repo, &format!("repository/commits/{}", commit_id)),
                &what,
            )
            .await?;
        let diffs: Vec<DiffEntry> = self
            .get_json(
                repo,
                &Self::project_url(repo, &format!("repository/commits/{}/diff", commit_id)),
                &what,
            )
            .await?;

        let mut added_list = Vec::new();
        let mut modified_list = Vec::new();
        for diff in &diffs {
            match diff_type(diff) {
                FileDiffType::Added => added_list.push(diff.new_path.clone()),
                FileDiffType::Modified => modified_list.push(diff.new_path.clone()),
                FileDiffType::Removed => {}
            }
        }

        let created_ts = chrono::DateTime::parse_from_rfc3339(&commit.created_at)
            .map_err(|e| VcsError::Decode(format!("{}: {}", what, e)))?
            .timestamp();
        let title = if commit.title.is_empty() {
            first_line(&commit.message).to_string()
        } else {
            commit.title
        };

        Ok(Commit {
            id: commit.id,
            title,
            message: commit.message,
            created_ts,
            url: commit.web_url,
            author_name: commit.author_name,
            author_email: commit.author_email,
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
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}?recursive=true&ref={}&path={}&per_page={}&page={}",
                Self::project_url(repo, "repository/tree"),
                urlencoding::encode(git_ref),
                urlencoding::encode(directory.trim_matches('/')),
                PAGE_SIZE,
                page
            );
            let batch: Vec<TreeEntry> = self
                .get_json(repo, &url, &format!("tree {}", git_ref))
                .await?;
            let batch_len = batch.len();

            files.extend(
                batch
                    .into_iter()
                    .filter(|entry| entry.entry_type == "blob")
                    .map(|entry| RepositoryFile { path: entry.path }),
            );

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    async fn get_branch(
        &self,
        repo: &RepositoryRef<'_>,
        branch: &str,
    ) -> Result<BranchInfo, VcsError> {
        let url = Self::project_url(
            repo,
            &format!("repository/branches/{}", urlencoding::encode(branch)),
        );
        let response: BranchResponse = self
            .get_json(repo, &url, &format!("branch {}", branch))
            .await?;

        Ok(BranchInfo {
            name: response.name,
            last_commit_id: response.commit.id,
        })
    }

    async fn create_webhook(
        &self,
        repo: &RepositoryRef<'_>,
        webhook: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let url = Self::project_url(repo, "hooks");
        let request = CreateWebhookRequest {
            url: &webhook.url,
            token: &webhook.secret_token,
            push_events: true,
            enable_ssl_verification: false,
        };

        let response = self
            .send(repo, "webhook", || self.client.post(&url).json(&request))
            .await?;
        let created: WebhookResponse = response
            .json()
            .await
            .map_err(|e| VcsError::Decode(format!("webhook: {}", e)))?;

        info!("Created GitLab webhook {} for project {}", created.id, repo.repository_id);
        Ok(created.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::OauthContext;

    #[test]
    fn test_project_url_encodes_path_ids() {
        let oauth = OauthContext::default();
        let repo = RepositoryRef {
            oauth: &oauth,
            instance_url: "https://gitlab.example.com/",
            repository_id: "15",
        };
        assert_eq!(
            GitLabProvider::project_url(&repo, "hooks"),
            "https://gitlab.example.com/api/v4/projects/15/hooks"
        );

        let repo = RepositoryRef {
            repository_id: "group/project",
            ..repo
        };
        assert_eq!(
            GitLabProvider::project_url(&repo, "repository/tree"),
            "https://gitlab.example.com/api/v4/projects/group%2Fproject/repository/tree"
        );
    }

    #[test]
    fn test_diff_type_from_flags() {
        let entry: DiffEntry =
            serde_json::from_str(r#"{"new_path":"a.sql","new_file":true}"#).unwrap();
        assert_eq!(diff_type(&entry), FileDiffType::Added);

        let entry: DiffEntry =
            serde_json::from_str(r#"{"new_path":"a.sql","deleted_file":true}"#).unwrap();
        assert_eq!(diff_type(&entry), FileDiffType::Removed);

        let entry: DiffEntry = serde_json::from_str(r#"{"new_path":"a.sql"}"#).unwrap();
        assert_eq!(diff_type(&entry), FileDiffType::Modified);
    }

    #[test]
    fn test_merge_request_changes_deserialize() {
        let raw = r#"{
            "sha": "abc123",
            "changes": [
                {"new_path": "db/v1__shop.sql", "new_file": true, "deleted_file": false},
                {"new_path": "db/old.sql", "new_file": false, "deleted_file": true}
            ]
        }"#;
        let mr: MergeRequestChanges = serde_json::from_str(raw).unwrap();
        assert_eq!(mr.sha, "abc123");
        assert!(mr.changes[1].deleted_file);
    }
}
