// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Learning task queue and worker
//!
//! The request path only enqueues; the worker runs extraction off the
//! request path, one task at a time. A full or closed queue drops the task
//! with a warning since extraction is best-effort enrichment.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::learning_service::LearningService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearningTask {
    ExtractPatterns { personality_id: String },
}

/// Sending half of the learning task queue
#[derive(Clone)]
pub struct LearningTaskQueue {
    sender: mpsc::Sender<LearningTask>,
}

impl LearningTaskQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<LearningTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting. Returns whether the task was accepted.
    pub fn enqueue(&self, task: LearningTask) -> bool {
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(?task, "Learning task queue full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(?task, "Learning task queue closed, dropping task");
                false
            }
        }
    }
}

/// Consumes learning tasks until cancelled or the queue closes
pub struct LearningWorker {
    service: Arc<dyn LearningService>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<LearningTask>>,
    shutdown_token: CancellationToken,
}

impl LearningWorker {
    pub fn new(service: Arc<dyn LearningService>, receiver: mpsc::Receiver<LearningTask>) -> Self {
        Self {
            service,
            receiver: tokio::sync::Mutex::new(receiver),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("Starting learning worker");
        let mut receiver = self.receiver.lock().await;

        loop {
            tokio::select! {
                task = receiver.recv() => match task {
                    Some(task) => self.handle(task).await,
                    None => {
                        debug!("Learning task queue closed");
                        break;
                    }
                },
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping learning worker");
                    break;
                }
            }
        }

        info!("Learning worker stopped");
    }

    async fn handle(&self, task: LearningTask) {
        match task {
            LearningTask::ExtractPatterns { personality_id } => {
                match self.service.extract_patterns(&personality_id).await {
                    Ok(patterns) => {
                        debug!(personality_id = %personality_id, extracted = patterns.len(), "Extraction task finished");
                    }
                    Err(e) => {
                        warn!(personality_id = %personality_id, error = %e, "Pattern extraction failed");
                    }
                }
            }
        }
    }
}
