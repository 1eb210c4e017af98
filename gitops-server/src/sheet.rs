//! Pulls SQL sheet files from a project's linked repository into the store.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use gitops_core::migration::{parse_sheet_info, sheet_base_directory};
use tracing::{debug, info};

use crate::error::WebhookError;
use crate::model::{
    SheetCreate, SheetFind, SheetPatch, SheetSource, SheetType, SheetVcsPayload, WorkflowType, SYSTEM_BOT_ID,
};
use crate::webhook::WebhookResponse;
use crate::AppState;

pub fn sheet_router() -> Router<Arc<AppState>> {
    Router::new().route("/project/{id}/sync-sheet", post(sync_sheet_handler))
}

/// Checks the bearer token against `ADMIN_AUTH_TOKEN`. Sync is disabled
/// while no token is configured.
fn validate_auth(headers: &HeaderMap, admin_token: Option<&str>) -> Result<(), WebhookError> {
    let Some(expected) = admin_token else {
        return Err(WebhookError::Forbidden(
            "Sheet sync is disabled (ADMIN_AUTH_TOKEN not configured)".to_string(),
        ));
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebhookError::Unauthorized("Missing bearer token".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| WebhookError::Unauthorized("Expected Authorization: Bearer <token>".to_string()))?;
    if provided != expected {
        return Err(WebhookError::Unauthorized("Invalid admin token".to_string()));
    }
    Ok(())
}

/// Handler: POST /project/{id}/sync-sheet
async fn sync_sheet_handler(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<WebhookResponse>, WebhookError> {
    validate_auth(&headers, state.admin_auth_token.as_deref())?;
    let count = sync_sheet(&state, project_id).await?;
    Ok(Json(WebhookResponse {
        message: format!("Synced {} sheet(s)", count),
    }))
}

/// Creates or refreshes one sheet per file under the sheet template's
/// directory, returning how many files were synced.
pub async fn sync_sheet(state: &AppState, project_id: i64) -> Result<usize, WebhookError> {
    let project = state
        .store
        .get_project(project_id)
        .await?
        .ok_or_else(|| WebhookError::NotFound(format!("Project not found by ID: {}", project_id)))?;
    if project.workflow_type != WorkflowType::Vcs {
        return Err(WebhookError::BadRequest(format!(
            "Invalid workflow type: {:?}, need {:?} to enable this function",
            project.workflow_type,
            WorkflowType::Vcs
        )));
    }

    let repo = state
        .store
        .get_repository_by_project(project_id)
        .await?
        .ok_or_else(|| WebhookError::NotFound(format!("Repository not found by project ID: {}", project_id)))?;
    let Some(vcs) = repo.vcs.as_ref() else {
        return Err(WebhookError::NotFound(format!("VCS not found for repository {}", repo.id)));
    };
    let session = state.session(&repo)?;
    let target = session.target();
    let source = SheetSource::from(vcs.vcs_type);

    let files = session
        .provider
        .fetch_repository_file_list(&target, &repo.branch_filter, sheet_base_directory(&repo.sheet_path_template))
        .await
        .map_err(|e| {
            WebhookError::internal(
                format!(
                    "Failed to fetch repository file list from VCS, instance URL: {}",
                    vcs.instance_url
                ),
                e,
            )
        })?;

    for file in &files {
        let sheet_info = parse_sheet_info(&file.path, &repo.sheet_path_template)
            .map_err(|e| WebhookError::internal("Failed to parse sheet info from template", e))?;
        if sheet_info.name.is_empty() {
            return Err(WebhookError::BadRequest(format!(
                "sheet name cannot be empty from sheet path {} with template {}",
                file.path, repo.sheet_path_template
            )));
        }

        let statement = session
            .provider
            .read_file_content(&target, &file.path, &repo.branch_filter)
            .await
            .map_err(|e| WebhookError::internal(format!("Failed to fetch file content for {}", file.path), e))?;
        let meta = session
            .provider
            .read_file_meta(&target, &file.path, &repo.branch_filter)
            .await
            .map_err(|e| WebhookError::internal(format!("Failed to fetch file meta for {}", file.path), e))?;
        let last_commit = session
            .provider
            .fetch_commit_by_id(&target, &meta.last_commit_id)
            .await
            .map_err(|e| {
                WebhookError::internal(format!("Failed to fetch commit {}", meta.last_commit_id), e)
            })?;

        let payload = SheetVcsPayload {
            file_name: meta.name,
            file_path: meta.path,
            size: meta.size,
            author: last_commit.author_name,
            last_commit_id: last_commit.id,
            last_sync_ts: chrono::Utc::now().timestamp(),
        };

        // ENV_NAME and DB_NAME are either both present or neither.
        let mut database_id = None;
        if !project.is_tenant() && !sheet_info.environment.is_empty() && !sheet_info.database.is_empty() {
            database_id = state
                .store
                .find_databases(project_id, &sheet_info.database)
                .await?
                .into_iter()
                .find(|db| db.instance.environment.name == sheet_info.environment)
                .map(|db| db.id);
        }

        let find = SheetFind {
            name: sheet_info.name.clone(),
            project_id,
            source,
            sheet_type: SheetType::Sql,
        };
        match state.store.get_sheet(&find).await? {
            Some(sheet) => {
                debug!("Updating sheet {} from {}", sheet.id, file.path);
                state
                    .store
                    .patch_sheet(SheetPatch {
                        id: sheet.id,
                        updater_id: SYSTEM_BOT_ID,
                        statement,
                        database_id,
                        payload,
                    })
                    .await?;
            }
            None => {
                debug!("Creating sheet {:?} from {}", sheet_info.name, file.path);
                state
                    .store
                    .create_sheet(SheetCreate {
                        project_id,
                        creator_id: SYSTEM_BOT_ID,
                        name: sheet_info.name,
                        statement,
                        source,
                        sheet_type: SheetType::Sql,
                        database_id,
                        payload,
                    })
                    .await?;
            }
        }
    }

    info!("Synced {} sheet(s) for project {}", files.len(), project_id);
    Ok(files.len())
}
