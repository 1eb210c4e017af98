pub mod advisory;
pub mod config;
pub mod databases;
pub mod error;
pub mod license;
pub mod link;
pub mod model;
pub mod oauth;
pub mod pipeline;
pub mod resolver;
pub mod sheet;
pub mod store;
pub mod webhook;

use std::sync::Arc;

use anyhow::anyhow;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use gitops_core::advisor::{RuleAdvisor, SqlReviewer};
use gitops_core::vcs::github::GitHubProvider;
use gitops_core::vcs::gitlab::GitLabProvider;
use gitops_core::vcs::{VcsProvider, VcsType};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{Config, Profile};
use crate::error::WebhookError;
use crate::license::{LicenseService, StaticLicense};
use crate::model::Repository;
use crate::oauth::RepositorySession;
use crate::store::{ActivityService, DriverFactory, InMemoryStore, IssueService, Store};

/// One provider implementation per VCS family.
#[derive(Clone)]
pub struct VcsProviders {
    github: Arc<dyn VcsProvider>,
    gitlab: Arc<dyn VcsProvider>,
}

impl VcsProviders {
    pub fn new(github: Arc<dyn VcsProvider>, gitlab: Arc<dyn VcsProvider>) -> Self {
        Self { github, gitlab }
    }

    /// REST clients talking to the real provider APIs.
    pub fn http() -> anyhow::Result<Self> {
        let client = gitops_core::vcs::create_http_client()?;
        Ok(Self::new(
            Arc::new(GitHubProvider::new(client.clone())),
            Arc::new(GitLabProvider::new(client)),
        ))
    }

    pub fn get(&self, vcs_type: VcsType) -> Arc<dyn VcsProvider> {
        match vcs_type {
            VcsType::GitHubCom => Arc::clone(&self.github),
            VcsType::GitLabSelfHost => Arc::clone(&self.gitlab),
        }
    }
}

pub struct AppState {
    pub profile: Profile,
    pub sql_review_fail_on_error: bool,
    pub admin_auth_token: Option<String>,
    pub store: Arc<dyn Store>,
    pub issues: Arc<dyn IssueService>,
    pub activities: Arc<dyn ActivityService>,
    pub drivers: Arc<dyn DriverFactory>,
    pub license: Arc<dyn LicenseService>,
    pub reviewer: Arc<dyn SqlReviewer>,
    pub providers: VcsProviders,
}

impl AppState {
    /// State backed entirely by one in-memory store and the built-in rules.
    pub fn with_memory_store(config: &Config, store: Arc<InMemoryStore>, providers: VcsProviders) -> Self {
        Self {
            profile: config.profile.clone(),
            sql_review_fail_on_error: config.sql_review_fail_on_error,
            admin_auth_token: config.admin_auth_token.clone(),
            store: store.clone(),
            issues: store.clone(),
            activities: store.clone(),
            drivers: store,
            license: Arc::new(StaticLicense {
                multi_tenancy: config.license_multi_tenancy,
            }),
            reviewer: Arc::new(RuleAdvisor::default()),
            providers,
        }
    }

    /// Provider calls on behalf of `repo`, refreshing tokens into the store.
    pub fn session<'a>(&self, repo: &'a Repository) -> Result<RepositorySession<'a>, WebhookError> {
        let vcs = repo.vcs.as_ref().ok_or_else(|| {
            WebhookError::internal(
                format!("Repository {} has no VCS", repo.id),
                anyhow!("unresolved VCS for {}", repo.web_url),
            )
        })?;
        Ok(RepositorySession {
            provider: self.providers.get(vcs.vcs_type),
            vcs,
            oauth: oauth::oauth_context(&self.store, repo),
            repository_id: &repo.external_id,
        })
    }
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "gitops-server"
    })))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(webhook::webhook_router())
        .merge(sheet::sheet_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
