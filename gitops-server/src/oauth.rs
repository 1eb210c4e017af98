use std::sync::Arc;

use async_trait::async_trait;
use gitops_core::vcs::{OauthContext, RepositoryRef, TokenRefresher, VcsProvider};
use tracing::info;

use crate::model::{Repository, TokenPatch, Vcs};
use crate::store::Store;

/// Persists a rotated token pair on every repository link sharing a web URL,
/// so the next call through any of them sees the new pair.
pub struct StoreTokenRefresher {
    store: Arc<dyn Store>,
    web_url: String,
}

impl StoreTokenRefresher {
    pub fn new(store: Arc<dyn Store>, web_url: impl Into<String>) -> Self {
        Self {
            store,
            web_url: web_url.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for StoreTokenRefresher {
    async fn refresh(&self, access_token: &str, refresh_token: &str, expires_ts: i64) -> anyhow::Result<()> {
        info!("Persisting refreshed OAuth token for {}", self.web_url);
        self.store
            .patch_repository_tokens(
                &self.web_url,
                &TokenPatch {
                    access_token: access_token.to_string(),
                    refresh_token: refresh_token.to_string(),
                    expires_ts,
                },
            )
            .await?;
        Ok(())
    }
}

/// OAuth context for `repo` whose refreshes are written back to `store`.
pub fn oauth_context(store: &Arc<dyn Store>, repo: &Repository) -> OauthContext {
    let refresher: Arc<dyn TokenRefresher> =
        Arc::new(StoreTokenRefresher::new(Arc::clone(store), repo.web_url.clone()));
    repo.oauth_context(Some(refresher))
}

/// A provider bound to one repository link's credentials.
pub struct RepositorySession<'a> {
    pub provider: Arc<dyn VcsProvider>,
    pub vcs: &'a Vcs,
    pub oauth: OauthContext,
    pub repository_id: &'a str,
}

impl RepositorySession<'_> {
    pub fn target(&self) -> RepositoryRef<'_> {
        RepositoryRef {
            oauth: &self.oauth,
            instance_url: &self.vcs.instance_url,
            repository_id: self.repository_id,
        }
    }
}
