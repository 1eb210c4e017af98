use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Prod,
    Dev,
}

impl ReleaseMode {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "prod" | "" => Ok(ReleaseMode::Prod),
            "dev" => Ok(ReleaseMode::Dev),
            other => bail!("RELEASE_MODE must be 'prod' or 'dev', got {:?}", other),
        }
    }
}

/// Deployment facts the webhook handlers depend on.
#[derive(Debug, Clone)]
pub struct Profile {
    pub external_url: String,
    pub workspace_id: String,
    pub mode: ReleaseMode,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub profile: Profile,
    pub license_multi_tenancy: bool,
    /// Fail the SQL review request when every file failed to review,
    /// instead of answering with an empty report.
    pub sql_review_fail_on_error: bool,
    /// Optional JSON file the in-memory store is seeded from.
    pub store_seed_path: Option<PathBuf>,
    /// Bearer token for `/project/{id}/sync-sheet`.
    /// If not set, the endpoint is disabled (returns 403 Forbidden).
    pub admin_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let external_url = env::var("EXTERNAL_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let workspace_id = env::var("WORKSPACE_ID")
            .context("WORKSPACE_ID environment variable is required")?;

        let mode = ReleaseMode::parse(&env::var("RELEASE_MODE").unwrap_or_default())
            .context("Invalid RELEASE_MODE")?;

        let license_multi_tenancy = parse_flag(env::var("LICENSE_MULTI_TENANCY").ok());
        let sql_review_fail_on_error = parse_flag(env::var("SQL_REVIEW_FAIL_ON_ERROR").ok());

        let store_seed_path = env::var("STORE_SEED_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let admin_auth_token = parse_admin_auth_token(env::var("ADMIN_AUTH_TOKEN").ok());

        Ok(Config {
            port,
            profile: Profile {
                external_url: external_url.trim_end_matches('/').to_string(),
                workspace_id,
                mode,
            },
            license_multi_tenancy,
            sql_review_fail_on_error,
            store_seed_path,
            admin_auth_token,
        })
    }
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|v| v.trim().parse::<bool>().unwrap_or(false))
        .unwrap_or(false)
}

/// Parse ADMIN_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so that an empty token never grants access.
pub fn parse_admin_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
