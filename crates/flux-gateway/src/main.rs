use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flux_core::config::FluxConfig;
use flux_core::token::TokenSigner;
use flux_runner::{Pipeline, PipelineSettings, ProcessRunner, ToolchainProvisioner};
use flux_scheduler::TriggerScheduler;
use flux_store::{JobStore, SecretStore};
use tracing::{info, warn};

mod app;
mod http;

const DEFAULT_FILTER: &str =
    "flux_gateway=info,flux_runner=info,flux_scheduler=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .init();

    // load config: explicit path > FLUX_CONFIG env > ~/.flux/flux.toml
    let config_path = std::env::var("FLUX_CONFIG").ok();
    let config = FluxConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        FluxConfig::default()
    });

    config.paths.ensure()?;
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // each store gets its own connection
    let jobs = Arc::new(JobStore::new(flux_store::db::open(db_path)?));
    let secrets = Arc::new(SecretStore::new(flux_store::db::open(db_path)?));
    if secrets.ensure_default("GITHUB_ACTIONS", "true")? {
        info!("seeded default secret GITHUB_ACTIONS");
    }

    let signer = match &config.auth.token_secret {
        Some(secret) => TokenSigner::new(secret.as_bytes(), config.auth.token_ttl_minutes),
        None => {
            warn!("auth.token_secret not set; tokens will not survive a restart");
            TokenSigner::random(config.auth.token_ttl_minutes)
        }
    };

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&jobs),
        Arc::clone(&secrets),
        Arc::new(ToolchainProvisioner::from_config(&config.paths, &config.runtime)),
        ProcessRunner::new(
            config.runtime.script_timeout_secs.map(Duration::from_secs),
            config.runtime.max_output_chars,
        ),
        signer.clone(),
        PipelineSettings {
            scripts_dir: config.paths.scripts_dir.clone(),
            node_bin: config.runtime.node_bin.clone(),
            api_url: config.server.public_url.clone(),
            admin_user: config.auth.admin_user.clone(),
        },
    ));

    let scheduler = Arc::new(TriggerScheduler::new(pipeline));
    scheduler.rebuild(&jobs.list_enabled()?);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(
        config,
        jobs,
        secrets,
        Arc::clone(&scheduler),
        signer,
    ));
    let router = app::build_router(state);

    info!("flux gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
