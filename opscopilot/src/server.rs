//! opscopilot-server - HTTP API for AI ticket summaries
//!
//! Serves the summarize, provider discovery, settings and ticket edit routes
//! over the local database.

mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use opscopilot_core::{Config, Database, SettingsStore, Summarizer};

#[derive(Parser)]
#[command(name = "opscopilot-server")]
#[command(about = "Serve AI ticket summaries over HTTP")]
#[command(version)]
struct Args {
    /// Listen address (overrides `server.bind` from the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file (defaults to the XDG config path)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let _log_guard =
        opscopilot_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    let settings = Arc::new(SettingsStore::new(db.clone(), config.ai.clone()));
    let summarizer = Summarizer::new(
        db.clone(),
        db.clone(),
        settings,
        config.ai.stream_timeout(),
    );

    let state = api::AppState {
        db,
        summarizer,
        auth_token: config.server.auth_token.as_deref().map(Arc::from),
    };

    let bind = args.bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!(bind = %bind, db = %db_path.display(), "opscopilot-server listening");
    println!("opscopilot-server listening on http://{bind}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    tracing::info!("opscopilot-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
