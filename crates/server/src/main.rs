mod audit;
mod bootstrap;
mod delivery;
mod execution;
mod health;
mod http;
mod render;

use std::time::Duration;

use anyhow::Result;
use steward_core::config::{AppConfig, ChatTransportKind, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use steward_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.db_pool.clone(), app.transport_name()),
    )
    .await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport_mode = app.transport_name(),
        "steward-server started"
    );

    let runner = app.chat_runner();
    tokio::select! {
        result = runner.start() => {
            result?;
            // A closed console means the operator is done; other transports
            // keep the health endpoint up until a signal arrives.
            if app.config.chat.transport != ChatTransportKind::Console {
                tracing::info!(
                    event_name = "system.server.chat_closed",
                    correlation_id = "shutdown",
                    "chat transport closed; waiting for shutdown signal"
                );
                wait_for_shutdown().await?;
            }
        }
        signal = wait_for_shutdown() => signal?,
    }

    tracing::info!(event_name = "system.server.stopping", correlation_id = "shutdown", "steward-server stopping");
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
