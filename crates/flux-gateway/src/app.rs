use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use flux_core::config::FluxConfig;
use flux_core::token::TokenSigner;
use flux_scheduler::TriggerScheduler;
use flux_store::{JobStore, SecretStore};
use std::sync::Arc;

use crate::http;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: FluxConfig,
    pub jobs: Arc<JobStore>,
    pub secrets: Arc<SecretStore>,
    /// Also owned by `main`, which shuts it down after the server stops.
    pub scheduler: Arc<TriggerScheduler>,
    pub signer: TokenSigner,
}

impl AppState {
    pub fn new(
        config: FluxConfig,
        jobs: Arc<JobStore>,
        secrets: Arc<SecretStore>,
        scheduler: Arc<TriggerScheduler>,
        signer: TokenSigner,
    ) -> Self {
        Self {
            config,
            jobs,
            secrets,
            scheduler,
            signer,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/scripts",
            get(http::scripts::list_scripts).post(http::scripts::create_script),
        )
        .route(
            "/scripts/{id}",
            put(http::scripts::update_script).delete(http::scripts::delete_script),
        )
        .route("/scripts/{id}/run", post(http::scripts::run_script))
        .route(
            "/secrets",
            get(http::secrets::list_secrets).post(http::secrets::upsert_secret),
        )
        .route("/secrets/{id}", delete(http::secrets::delete_secret))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            http::auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/token", post(http::auth::login))
        .nest("/api", api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
