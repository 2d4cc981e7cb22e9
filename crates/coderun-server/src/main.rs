// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coderun Server binary.
//!
//! Loads configuration, opens the project registry, serves the HTTP API and
//! stops every dev server on shutdown.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use coderun_runner::{PortAllocator, ProjectRunner, SqliteProjectStore};
use coderun_server::auth::JwtIdentityResolver;
use coderun_server::{AppState, Config, LogFormat, build_router, cors_layer};

const DEFAULT_LOG_FILTER: &str = "coderun_server=info,coderun_runner=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    let dotenv = dotenvy::dotenv();

    init_tracing(LogFormat::from_env());
    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    info!("Starting coderun server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        bind_addr = %config.bind_addr,
        database = %config.database_path.display(),
        storage_dir = %config.storage_dir.display(),
        start_cmd = %config.toolchain.start,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    info!("Opening project registry...");
    let store = SqliteProjectStore::from_path(&config.database_path).await?;
    info!("Project registry ready");

    let runner = Arc::new(
        ProjectRunner::builder()
            .store(Arc::new(store))
            .storage_dir(&config.storage_dir)
            .toolchain(config.toolchain.clone())
            .ports(PortAllocator::with_reserved(
                config.reserved_ports.iter().copied(),
            ))
            .stop_grace(config.stop_grace)
            // Dev servers must not try to open a browser on the host.
            .process_env("BROWSER", "none")
            .build()?,
    );

    let identity = Arc::new(JwtIdentityResolver::new(&config.jwt_secret));
    let state = AppState::new(runner.clone(), identity);
    let app = build_router(state, cors_layer(&config.cors_origin));

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, stopping dev servers...");
    runner.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
