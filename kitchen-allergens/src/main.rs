//! kitchen-allergens - Allergen propagation and aggregation service
//!
//! `serve` (default) runs the HTTP API. `reaggregate` runs one full two-phase
//! re-aggregation and prints the JSON report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kitchen_common::config::TomlConfig;
use kitchen_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kitchen_allergens::api::reaggregate::ReaggregateResponse;
use kitchen_allergens::services::{AllergenEngine, GovernorRateLimiter};
use kitchen_allergens::{config, AppState, AuthSettings};

/// Command-line arguments for kitchen-allergens
#[derive(Parser, Debug)]
#[command(name = "kitchen-allergens")]
#[command(about = "Allergen propagation and aggregation service")]
#[command(version)]
struct Args {
    /// Bootstrap TOML config file
    #[arg(short, long, env = "KITCHEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve,
    /// Re-aggregate every recipe then every dish, print the report and exit
    Reaggregate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over logging.level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", toml_config.logging.level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting kitchen-allergens {} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Database: {}", toml_config.database_path.display());

    let db_pool = kitchen_allergens::db::init_database_pool(
        &toml_config.database_path,
        toml_config.database.max_connections,
    )
    .await
    .context("Failed to open database")?;

    let event_bus = EventBus::new(toml_config.engine.event_capacity);
    let inference = config::build_inference(&db_pool, &toml_config)
        .await
        .context("Failed to configure allergen inference")?;
    let engine = AllergenEngine::new(
        db_pool.clone(),
        inference,
        event_bus.clone(),
        config::engine_settings(&toml_config),
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Reaggregate => run_reaggregate(&engine).await,
        Command::Serve => {
            let rate_limiter = Arc::new(GovernorRateLimiter::new(
                toml_config.rate_limit.requests,
                Duration::from_secs(toml_config.rate_limit.window_secs),
            ));
            let auth = AuthSettings {
                max_clock_skew_ms: toml_config.auth.max_clock_skew_ms,
            };
            let state = AppState::new(db_pool, engine, event_bus, rate_limiter, auth);
            serve(state, &toml_config).await
        }
    }
}

async fn run_reaggregate(engine: &AllergenEngine) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling re-aggregation");
            ctrl_c_cancel.cancel();
        }
    });

    let report = engine
        .batch
        .reaggregate_all(&cancel)
        .await
        .context("Re-aggregation aborted")?;

    println!("{}", serde_json::to_string_pretty(&ReaggregateResponse::from(&report))?);
    Ok(())
}

async fn serve(state: AppState, toml_config: &TomlConfig) -> Result<()> {
    let app = kitchen_allergens::build_router(state);

    let addr = format!("{}:{}", toml_config.bind_address, toml_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
