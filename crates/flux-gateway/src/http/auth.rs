//! Login and bearer-token enforcement.
//!
//! `POST /token` exchanges the configured admin credentials for a signed
//! token. It takes an OAuth2 password form or the same fields as JSON.
//! Every `/api/*` route passes through [`require_bearer`].

use axum::{
    extract::{FromRequest, Request, State},
    http::header::{AUTHORIZATION, CONTENT_TYPE},
    middleware::Next,
    response::Response,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login body, decoded as a form when the request says so and as JSON
/// otherwise.
pub struct Credentials(pub LoginRequest);

impl<S: Send + Sync> FromRequest<S> for Credentials {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        let login = if is_form {
            Form::<LoginRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?
                .0
        } else {
            Json::<LoginRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?
                .0
        };
        Ok(Self(login))
    }
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// POST /token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Credentials(req): Credentials,
) -> ApiResult<Json<TokenResponse>> {
    let auth = &state.config.auth;
    if req.username != auth.admin_user || req.password != auth.admin_password {
        warn!(username = %req.username, "login rejected");
        return Err(ApiError::BadCredentials);
    }

    let access_token = state
        .signer
        .mint(&req.username)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(username = %req.username, "token issued");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

/// Reject requests without a valid `Authorization: Bearer <token>` header.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.signer.verify(token).map_err(|e| {
        warn!(code = e.code(), "bearer token rejected: {e}");
        ApiError::Unauthorized
    })?;
    if claims.sub != state.config.auth.admin_user {
        warn!(sub = %claims.sub, "token subject is not the admin user");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}
