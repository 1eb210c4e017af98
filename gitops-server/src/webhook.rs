use axum::{
    extract::{Path, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use gitops_core::report::SqlReviewResult;
use gitops_core::vcs::{github, gitlab};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::advisory::{review_pull_request, SqlReviewRequest};
use crate::config::ReleaseMode;
use crate::error::WebhookError;
use crate::pipeline::process_push_event;
use crate::resolver::{filter_repositories, is_webhook_event_branch};
use crate::AppState;

pub const SQL_REVIEW_TOKEN_HEADER: &str = "x-sql-review-token";

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
}

impl WebhookResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            message: "OK".to_string(),
        })
    }
}

/// Per-request ID carried on the request span.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

async fn with_correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());
    let span = info_span!(
        "webhook",
        correlation_id = %correlation_id.0,
        path = %request.uri().path()
    );
    request.extensions_mut().insert(correlation_id);
    next.run(request).instrument(span).await
}

async fn read_body(request: Request) -> Result<(HeaderMap, axum::body::Bytes), WebhookError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| WebhookError::BadRequest(format!("Failed to read webhook request: {}", e)))?;
    Ok((parts.headers, bytes))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn push_response(messages: Vec<String>) -> Json<WebhookResponse> {
    if messages.is_empty() {
        return WebhookResponse::ok();
    }
    Json(WebhookResponse {
        message: messages.join("\n"),
    })
}

/// Handler: POST /webhook/gitlab/{id}
pub async fn gitlab_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    request: Request,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let (headers, bytes) = read_body(request).await?;

    let event: gitlab::WebhookEvent = serde_json::from_slice(&bytes)
        .map_err(|e| WebhookError::BadRequest(format!("Malformed push event: {}", e)))?;
    if event.object_kind != gitlab::PUSH_OBJECT_KIND {
        info!("Ignored GitLab {} event", event.object_kind);
        return Ok(WebhookResponse::ok());
    }
    let push: gitlab::WebhookPushEvent = serde_json::from_slice(&bytes)
        .map_err(|e| WebhookError::BadRequest(format!("Malformed push event: {}", e)))?;

    let token = header_str(&headers, gitlab::TOKEN_HEADER);
    let repositories = filter_repositories(state.store.as_ref(), &endpoint_id, &push.repository_id(), |repo| {
        if repo.webhook_secret_token != token {
            debug!("Skip repository {} as the secret token does not match", repo.id);
            return Ok(false);
        }
        is_webhook_event_branch(&push.ref_name, &repo.branch_filter)
    })
    .await?;
    if repositories.is_empty() {
        return Ok(WebhookResponse::ok());
    }

    let push_event = push
        .to_push_event()
        .map_err(|e| WebhookError::internal("Failed to convert GitLab commits", e))?;
    let messages = process_push_event(&state, &repositories, &push_event).await?;
    Ok(push_response(messages))
}

/// Handler: POST /webhook/github/{id}
pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    request: Request,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let (headers, bytes) = read_body(request).await?;

    match github::WebhookType::from_header(header_str(&headers, github::EVENT_HEADER)) {
        github::WebhookType::Push => {}
        github::WebhookType::Ping => return Ok(WebhookResponse::ok()),
        github::WebhookType::Other(kind) => {
            info!("Ignored GitHub {:?} event", kind);
            return Ok(WebhookResponse::ok());
        }
    }

    let push: github::WebhookPushEvent = serde_json::from_slice(&bytes)
        .map_err(|e| WebhookError::BadRequest(format!("Malformed push event: {}", e)))?;

    let signature = header_str(&headers, github::SIGNATURE_HEADER);
    let repositories = filter_repositories(state.store.as_ref(), &endpoint_id, push.repository_id(), |repo| {
        if !github::validate_signature_256(signature, &repo.webhook_secret_token, &bytes) {
            debug!("Skip repository {} as the signature does not match", repo.id);
            return Ok(false);
        }
        is_webhook_event_branch(&push.ref_name, &repo.branch_filter)
    })
    .await?;
    if repositories.is_empty() {
        return Ok(WebhookResponse::ok());
    }

    let messages = process_push_event(&state, &repositories, &push.to_push_event()).await?;
    Ok(push_response(messages))
}

/// Handler: POST /webhook/sql-review/{id}
pub async fn sql_review_handler(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    request: Request,
) -> Result<Json<SqlReviewResult>, WebhookError> {
    let (headers, bytes) = read_body(request).await?;
    let review: SqlReviewRequest = serde_json::from_slice(&bytes)
        .map_err(|e| WebhookError::BadRequest(format!("Malformed SQL review request: {}", e)))?;

    let token = header_str(&headers, SQL_REVIEW_TOKEN_HEADER);
    let profile = &state.profile;
    let repositories = filter_repositories(state.store.as_ref(), &endpoint_id, &review.repository_id, |repo| {
        if !repo.enable_sql_review_ci {
            debug!("Skip repository {} as the SQL review CI is not enabled", repo.id);
            return Ok(false);
        }
        if !repo.web_url.starts_with(&review.web_url) {
            debug!(
                "Skip repository {} as the web URL {} does not match {}",
                repo.id, repo.web_url, review.web_url
            );
            return Ok(false);
        }
        // Integration tests authenticate with the workspace ID.
        if profile.mode == ReleaseMode::Dev && token == profile.workspace_id {
            return Ok(true);
        }
        Ok(token == repo.webhook_secret_token)
    })
    .await?;
    if repositories.is_empty() {
        debug!("No repository accepted the SQL review request");
        return Ok(Json(SqlReviewResult::empty()));
    }

    let result = review_pull_request(Arc::clone(&state), &repositories, &review).await?;
    Ok(Json(result))
}

pub fn webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook/gitlab/{id}", post(gitlab_webhook_handler))
        .route("/webhook/github/{id}", post(github_webhook_handler))
        .route("/webhook/sql-review/{id}", post(sql_review_handler))
        .route_layer(middleware::from_fn(with_correlation_id))
}
