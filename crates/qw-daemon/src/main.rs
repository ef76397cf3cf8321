//! qw-daemon entry point.
//!
//! Loads config and secrets, waits for Postgres, starts the guardian loop and
//! serves the health/status API until ctrl-c.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use qw_daemon::{routes, state, wiring};
use qw_db::PgStore;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = qw_config::load_from_env().context("config load failed")?;
    let secrets = qw_config::resolve_secrets(|k| std::env::var(k).ok());
    let cfg = &loaded.config;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let db_url = secrets.require_database_url()?;
    let pool = qw_db::connect_with_retry(
        db_url,
        cfg.database.max_connections,
        std::time::Duration::from_secs(cfg.database.retry_secs),
    )
    .await;

    let broker = wiring::broker_from_config(cfg, &secrets)?;
    let notifier = wiring::notifier_from_config(cfg, &secrets)?;
    let store = Arc::new(PgStore::new(pool));
    let guardian = wiring::guardian_from_config(cfg, broker, store, notifier)?;

    let shared = Arc::new(state::AppState::new(
        guardian.status_handle(),
        loaded.config_hash.clone(),
        cfg.thresholds.warn_queue_size,
        cfg.thresholds.del_queue_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let guardian_task = tokio::spawn(guardian.run(shutdown_rx));

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr: SocketAddr = cfg
        .daemon
        .addr
        .parse()
        .with_context(|| format!("invalid daemon addr: {}", cfg.daemon.addr))?;
    info!("qw-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server crashed")?;

    let _ = shutdown_tx.send(true);
    guardian_task.await.context("guardian task panicked")?;

    Ok(())
}

fn init_tracing() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("QW_LOG_JSON").map(|v| v == "1").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
