use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flux_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by API handlers, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized. Set 'Authorization: Bearer <token>' header.")]
    Unauthorized,

    #[error("Incorrect username or password")]
    BadCredentials,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadCredentials | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => ApiError::NotFound { kind, id },
            StoreError::NameTaken(name) => {
                ApiError::BadRequest(format!("a job named {name:?} already exists"))
            }
            other => {
                error!("store error: {other}");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
