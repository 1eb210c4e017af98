use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::store::StoreError;

#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Error returned by the HTTP handlers.
///
/// The message is shown to the caller; `Internal` errors are also logged,
/// since the caller is usually a VCS provider nobody is watching.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}: {source}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl WebhookError {
    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        WebhookError::Internal {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Forbidden(_) => StatusCode::FORBIDDEN,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Conflict(_) => StatusCode::CONFLICT,
            WebhookError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => WebhookError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(msg) => WebhookError::Conflict(msg),
            other => WebhookError::internal("Store operation failed", other),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            WebhookError::Internal { message, source } => {
                error!("{}: {:#}", message, source);
                message.clone()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(WebhookError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(WebhookError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(WebhookError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            WebhookError::internal("boom", anyhow::anyhow!("cause")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: WebhookError = StoreError::Conflict("project 1 has already linked repository".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: WebhookError = StoreError::Internal("disk".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_internal_error_hides_source_from_body() {
        let response = WebhookError::internal("Failed to list pull request file", anyhow::anyhow!("token xyz")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Failed to list pull request file");
    }
}
