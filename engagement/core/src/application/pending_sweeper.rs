// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pending Sweeper - Background task that closes unanswered engagements
//!
//! Records that never receive a user response would otherwise stay pending
//! forever. Each cycle expires those older than the configured TTL; an
//! expired record counts as an unsuccessful engagement for extraction.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic expiry of stale pending engagement records

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::application::learning_service::LearningService;
use crate::domain::config::LearningConfig;

#[derive(Debug, Clone)]
pub struct PendingSweeperConfig {
    /// How often to run the sweeper
    pub interval: Duration,

    pub enabled: bool,
}

impl Default for PendingSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            enabled: true,
        }
    }
}

impl From<&LearningConfig> for PendingSweeperConfig {
    fn from(config: &LearningConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            enabled: config.sweep_interval_seconds > 0,
        }
    }
}

pub struct PendingSweeper {
    learning_service: Arc<dyn LearningService>,
    config: PendingSweeperConfig,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl PendingSweeper {
    pub fn new(learning_service: Arc<dyn LearningService>, config: PendingSweeperConfig) -> Self {
        Self {
            learning_service,
            config,
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Pending sweeper is disabled");
            return;
        }

        info!(
            interval_seconds = self.config.interval.as_secs(),
            "Starting pending sweeper background task"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running pending sweeper cycle");

                    match self.sweep_cycle().await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "Expired stale pending engagements"),
                        Err(e) => warn!("Pending sweeper cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping pending sweeper");
                    break;
                }
            }
        }

        info!("Pending sweeper background task stopped");
    }

    async fn sweep_cycle(&self) -> Result<usize> {
        Ok(self.learning_service.expire_stale_pending(Utc::now()).await?)
    }
}
