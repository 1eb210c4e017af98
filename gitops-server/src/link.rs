//! Linking a project to an external repository.

use gitops_core::migration::{validate_file_path_template, validate_schema_path_template};
use gitops_core::template::{join_path, validate_asterisks};
use gitops_core::vcs::{OauthContext, RepositoryRef, VcsType, WebhookCreate};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::error::WebhookError;
use crate::model::{Repository, RepositoryCreate};
use crate::store::StoreError;
use crate::AppState;

const SECRET_TOKEN_LENGTH: usize = 16;

/// Validates and stores repository links, registering the push webhook the
/// first time an external repository is linked.
pub struct RepositoryLinker<'a> {
    state: &'a AppState,
}

impl<'a> RepositoryLinker<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Links `create.project_id` to the repository described by `create`.
    ///
    /// The webhook fields of `create` are ignored and filled in here.
    pub async fn link(&self, mut create: RepositoryCreate) -> Result<Repository, WebhookError> {
        if create.branch_filter.is_empty() {
            return Err(WebhookError::BadRequest("Branch must be specified.".to_string()));
        }

        let has_wildcard = create.branch_filter.contains('*');
        if has_wildcard && !create.schema_path_template.is_empty() {
            return Err(WebhookError::BadRequest(
                "Schema path template is supported only if branch doesn't have wildcard.".to_string(),
            ));
        }

        if let Err(e) = validate_asterisks(&join_path(&create.base_directory, &create.file_path_template)) {
            return Err(WebhookError::BadRequest(format!(
                "Invalid base directory and filepath template combination: {}",
                e
            )));
        }

        let project = self
            .state
            .store
            .get_project(create.project_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("Project not found with ID {}", create.project_id)))?;

        validate_file_path_template(&create.file_path_template, project.is_tenant())
            .and_then(|_| validate_schema_path_template(&create.schema_path_template, project.is_tenant()))
            .map_err(|e| WebhookError::BadRequest(format!("Malformed create linked repository request: {}", e)))?;

        let vcs = self
            .state
            .store
            .get_vcs(create.vcs_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("VCS not found with ID: {}", create.vcs_id)))?;

        let provider = self.state.providers.get(vcs.vcs_type);
        let oauth = OauthContext {
            client_id: vcs.application_id.clone(),
            client_secret: vcs.secret.clone(),
            access_token: create.access_token.clone(),
            refresh_token: create.refresh_token.clone(),
            refresher: None,
        };
        let target = RepositoryRef {
            oauth: &oauth,
            instance_url: &vcs.instance_url,
            repository_id: &create.external_id,
        };

        // Without a wildcard the branch must already exist.
        if !has_wildcard {
            if let Err(e) = provider.get_branch(&target, &create.branch_filter).await {
                if e.is_not_found() {
                    return Err(WebhookError::NotFound(format!(
                        "Branch {:?} not found in repository {}.",
                        create.branch_filter, create.name
                    )));
                }
                return Err(WebhookError::internal(
                    format!("Failed to get branch {:?}", create.branch_filter),
                    e,
                ));
            }
        }

        // All links to one external repository share its webhook.
        let existing = self.state.store.find_repositories_by_web_url(&create.web_url).await?;
        let (endpoint_id, secret_token, webhook_id) = match existing.first() {
            Some(repo) => (
                repo.webhook_endpoint_id.clone(),
                repo.webhook_secret_token.clone(),
                repo.external_webhook_id.clone(),
            ),
            None => {
                let endpoint_id = format!(
                    "{}-{}",
                    self.state.profile.workspace_id,
                    chrono::Utc::now().timestamp()
                );
                let secret_token = random_secret();
                let webhook = WebhookCreate {
                    url: webhook_url(&self.state.profile.external_url, vcs.vcs_type, &endpoint_id),
                    secret_token: secret_token.clone(),
                };
                let webhook_id = provider.create_webhook(&target, &webhook).await.map_err(|e| {
                    WebhookError::internal(
                        format!("Failed to create webhook for project ID: {}", create.project_id),
                        e,
                    )
                })?;
                info!("Created webhook {} for {}", webhook_id, create.web_url);
                (endpoint_id, secret_token, webhook_id)
            }
        };

        create.webhook_endpoint_id = endpoint_id;
        create.webhook_secret_token = secret_token;
        create.external_webhook_id = webhook_id;
        create.base_directory = create.base_directory.trim_matches('/').to_string();

        let project_id = create.project_id;
        self.state.store.create_repository(create).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                WebhookError::Conflict(format!("Project {} has already linked repository", project_id))
            }
            other => WebhookError::internal("Failed to link project repository", other),
        })
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Where the provider delivers push events for `endpoint_id`.
pub fn webhook_url(external_url: &str, vcs_type: VcsType, endpoint_id: &str) -> String {
    let provider = match vcs_type {
        VcsType::GitLabSelfHost => "gitlab",
        VcsType::GitHubCom => "github",
    };
    format!("{}/webhook/{}/{}", external_url, provider, endpoint_id)
}
