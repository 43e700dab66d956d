// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Engagement daemon
//!
//! Loads configuration, wires the engagement runtime and serves the HTTP and
//! WebSocket surface until Ctrl-C or SIGTERM. On shutdown every armed
//! schedule is dropped and every client connection is closed.

use anyhow::{Context, Result};
use clap::Args;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use kindred_core::application::EngagementRuntime;
use kindred_core::domain::config::{EngagementConfigManifest, MetricsConfig};
use kindred_core::presentation;

#[derive(Args)]
pub struct ServeCommand {
    /// Override the configured bind address
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,
}

pub async fn execute(cmd: ServeCommand, config_path: Option<PathBuf>) -> Result<()> {
    let mut config =
        EngagementConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(bind) = cmd.bind {
        config.spec.network.bind_address = bind;
    }
    if let Some(port) = cmd.port {
        config.spec.network.port = port;
    }
    config.validate().context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        oracle = %config.spec.oracle.provider_type,
        model = %config.spec.oracle.model,
        "Kindred daemon starting"
    );

    if config.spec.observability.metrics.enabled {
        install_metrics_exporter(&config.spec.network.bind_address, &config.spec.observability.metrics)?;
    }

    let runtime = Arc::new(
        EngagementRuntime::from_config(&config)
            .await
            .context("Failed to initialize engagement runtime")?,
    );
    let app = presentation::app(runtime.clone());

    let addr = format!("{}:{}", config.spec.network.bind_address, config.spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Daemon listening on {}", addr);

    let shutdown_runtime = runtime.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // open sockets would otherwise hold the server open
            shutdown_runtime.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    info!("Daemon stopped");
    Ok(())
}

fn install_metrics_exporter(bind_address: &str, metrics: &MetricsConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, metrics.port)
        .parse()
        .with_context(|| format!("Invalid metrics listen address {}:{}", bind_address, metrics.port))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!("kindred_decisions_total", "Engagement decisions evaluated, by result");
    describe_counter!("kindred_deliveries_total", "Proactive delivery attempts, by result");
    describe_counter!("kindred_schedules_total", "Delayed deliveries armed or cancelled");
    describe_counter!("kindred_outcomes_scored_total", "User responses scored, by sentiment");
    describe_counter!("kindred_patterns_extracted_total", "Learned patterns persisted, by type");

    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
