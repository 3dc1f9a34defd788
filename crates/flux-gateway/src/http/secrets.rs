//! Secret management: `/api/secrets`. Values go in but never come back out.

use axum::{
    extract::{Path, State},
    Json,
};
use flux_core::types::SecretEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

#[derive(Deserialize)]
pub struct SecretRequest {
    pub key: String,
    pub value: String,
}

/// GET /api/secrets
pub async fn list_secrets(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<SecretEntry>>> {
    Ok(Json(state.secrets.list()?))
}

/// POST /api/secrets: insert, or overwrite the value of an existing key.
pub async fn upsert_secret(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SecretRequest>,
) -> ApiResult<Json<SecretEntry>> {
    let key = req.key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("key must not be empty".to_string()));
    }
    let entry = state.secrets.upsert(key, &req.value)?;
    info!(key = %entry.key, "secret saved");
    Ok(Json(entry))
}

/// DELETE /api/secrets/{id}
pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.secrets.delete(id)?;
    Ok(Json(json!({ "status": "deleted" })))
}
