use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gitops_server::config::Config;
use gitops_server::store::{InMemoryStore, StoreSeed};
use gitops_server::{build_router, AppState, VcsProviders};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting GitOps webhook server");

    let config = Config::from_env()?;
    info!(
        "Workspace {} in {:?} mode, external URL {}",
        config.profile.workspace_id, config.profile.mode, config.profile.external_url
    );

    let store = match &config.store_seed_path {
        Some(path) => {
            info!("Seeding store from {}", path.display());
            InMemoryStore::from_seed(StoreSeed::load(path)?)
        }
        None => InMemoryStore::new(),
    };

    let providers = VcsProviders::http()?;
    let state = Arc::new(AppState::with_memory_store(&config, Arc::new(store), providers));
    let app = build_router(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
