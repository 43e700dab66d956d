// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engagement Runtime
//!
//! Owns one instance of every engagement component for the life of the
//! process. The connection registry and the schedule arena live here and are
//! injected where they are needed; nothing is ambient global state.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the engagement subsystem

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::coordinator::EngagementCoordinator;
use crate::application::decision_engine::{DecisionEngine, StandardDecisionEngine};
use crate::application::delivery_scheduler::DeliveryScheduler;
use crate::application::error::EngagementError;
use crate::application::learning_service::{LearningService, LearningSettings, StandardLearningService};
use crate::application::learning_worker::{LearningTaskQueue, LearningWorker};
use crate::application::pending_sweeper::{PendingSweeper, PendingSweeperConfig};
use crate::application::repository_factory::{create_repositories, Repositories};
use crate::domain::config::{EngagementConfigManifest, LearningConfig, OracleConfig};
use crate::domain::oracle::Oracle;
use crate::domain::repository::{ConversationLog, EngagementRepository, PatternRepository, StorageBackend};
use crate::infrastructure::connection_registry::ConnectionRegistry;
use crate::infrastructure::db::Database;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::oracle::oracle_from_config;

pub struct EngagementRuntime {
    pub event_bus: EventBus,
    pub registry: Arc<ConnectionRegistry>,
    pub decision_engine: Arc<dyn DecisionEngine>,
    pub learning_service: Arc<dyn LearningService>,
    pub scheduler: Arc<DeliveryScheduler>,
    pub coordinator: Arc<EngagementCoordinator>,
    pub conversation_log: Arc<dyn ConversationLog>,
    background_tokens: Vec<CancellationToken>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EngagementRuntime {
    pub fn builder() -> EngagementRuntimeBuilder {
        EngagementRuntimeBuilder::default()
    }

    /// Build the runtime described by a configuration manifest, connecting
    /// to the database and the oracle as configured.
    pub async fn from_config(config: &EngagementConfigManifest) -> anyhow::Result<Self> {
        let backend = config.spec.storage.backend()?;
        let pool = match &backend {
            StorageBackend::PostgreSQL(pg) => Some(Database::connect(pg).await?.get_pool().clone()),
            StorageBackend::InMemory => None,
        };
        let repositories = create_repositories(&backend, pool)?;
        let oracle = oracle_from_config(&config.spec.oracle)?;

        Ok(Self::builder()
            .oracle(oracle)
            .repositories(repositories)
            .oracle_config(config.spec.oracle.clone())
            .learning_config(config.spec.learning.clone())
            .build()?)
    }

    /// Cancel every schedule, stop background tasks, then close every connection.
    pub async fn shutdown(&self) {
        info!("Shutting down engagement runtime");
        self.scheduler.shutdown();
        for token in &self.background_tokens {
            token.cancel();
        }

        let tasks = std::mem::take(&mut *self.background_tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.registry.shutdown().await;
    }
}

#[derive(Default)]
pub struct EngagementRuntimeBuilder {
    oracle: Option<Arc<dyn Oracle>>,
    engagements: Option<Arc<dyn EngagementRepository>>,
    patterns: Option<Arc<dyn PatternRepository>>,
    conversation_log: Option<Arc<dyn ConversationLog>>,
    event_bus: Option<EventBus>,
    oracle_config: OracleConfig,
    learning_config: LearningConfig,
    without_background_tasks: bool,
}

impl EngagementRuntimeBuilder {
    pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn engagement_repository(mut self, repository: Arc<dyn EngagementRepository>) -> Self {
        self.engagements = Some(repository);
        self
    }

    pub fn pattern_repository(mut self, repository: Arc<dyn PatternRepository>) -> Self {
        self.patterns = Some(repository);
        self
    }

    pub fn conversation_log(mut self, log: Arc<dyn ConversationLog>) -> Self {
        self.conversation_log = Some(log);
        self
    }

    pub fn repositories(self, repositories: Repositories) -> Self {
        self.engagement_repository(repositories.engagements)
            .pattern_repository(repositories.patterns)
            .conversation_log(repositories.conversation_log)
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn oracle_config(mut self, config: OracleConfig) -> Self {
        self.oracle_config = config;
        self
    }

    pub fn learning_config(mut self, config: LearningConfig) -> Self {
        self.learning_config = config;
        self
    }

    /// Skip the learning worker and the pending sweeper; extraction then runs inline.
    pub fn without_background_tasks(mut self) -> Self {
        self.without_background_tasks = true;
        self
    }

    /// Wire every component. Spawns background tasks, so it must run inside a
    /// tokio runtime unless `without_background_tasks` was chosen.
    pub fn build(self) -> Result<EngagementRuntime, EngagementError> {
        let oracle = self.oracle.ok_or_else(|| missing("oracle"))?;
        let engagements = self.engagements.ok_or_else(|| missing("engagement repository"))?;
        let patterns = self.patterns.ok_or_else(|| missing("pattern repository"))?;
        let conversation_log = self.conversation_log.ok_or_else(|| missing("conversation log"))?;
        let event_bus = self.event_bus.unwrap_or_default();

        let settings = LearningSettings::from_config(&self.learning_config, &self.oracle_config);
        let mut learning =
            StandardLearningService::new(engagements, patterns, oracle.clone(), event_bus.clone(), settings);

        let mut background_tokens = Vec::new();
        let mut background_tasks = Vec::new();

        let queue_receiver = if self.without_background_tasks {
            None
        } else {
            let (queue, receiver) = LearningTaskQueue::bounded(self.learning_config.task_queue_capacity);
            learning = learning.with_task_queue(queue);
            Some(receiver)
        };
        let learning_service: Arc<dyn LearningService> = Arc::new(learning);

        if let Some(receiver) = queue_receiver {
            let worker = Arc::new(LearningWorker::new(learning_service.clone(), receiver));
            background_tokens.push(worker.shutdown_token());
            background_tasks.push(worker.start());

            let sweeper = Arc::new(PendingSweeper::new(
                learning_service.clone(),
                PendingSweeperConfig::from(&self.learning_config),
            ));
            background_tokens.push(sweeper.shutdown_token());
            background_tasks.push(sweeper.start());
        }

        let decision_engine: Arc<dyn DecisionEngine> = Arc::new(
            StandardDecisionEngine::new(oracle, self.oracle_config.decision_options(), event_bus.clone())
                .with_pattern_limit(self.learning_config.decision_pattern_limit),
        );
        let registry = Arc::new(ConnectionRegistry::new(conversation_log.clone(), event_bus.clone()));
        let scheduler = Arc::new(DeliveryScheduler::new(
            learning_service.clone(),
            registry.clone(),
            event_bus.clone(),
        ));
        let coordinator = Arc::new(EngagementCoordinator::new(
            decision_engine.clone(),
            learning_service.clone(),
            scheduler.clone(),
            self.learning_config.decision_pattern_limit,
        ));

        info!(background_tasks = background_tasks.len(), "Engagement runtime initialized");
        Ok(EngagementRuntime {
            event_bus,
            registry,
            decision_engine,
            learning_service,
            scheduler,
            coordinator,
            conversation_log,
            background_tokens,
            background_tasks: Mutex::new(background_tasks),
        })
    }
}

fn missing(component: &str) -> EngagementError {
    EngagementError::Configuration(format!("engagement runtime requires a {}", component))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::oracle::{OracleError, OracleOptions};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct NullOracle;

    #[async_trait]
    impl Oracle for NullOracle {
        async fn generate_structured(&self, _: &str, _: &Value, _: &OracleOptions) -> Result<Value, OracleError> {
            Err(OracleError::Provider("null".into()))
        }

        async fn health_check(&self) -> Result<(), OracleError> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_oracle_fails_fast() {
        let repositories = create_repositories(&StorageBackend::InMemory, None).unwrap();
        let result = EngagementRuntime::builder()
            .repositories(repositories)
            .without_background_tasks()
            .build();
        assert!(matches!(result, Err(EngagementError::Configuration(msg)) if msg.contains("oracle")));
    }

    #[test]
    fn test_missing_conversation_log_fails_fast() {
        let repositories = create_repositories(&StorageBackend::InMemory, None).unwrap();
        let result = EngagementRuntime::builder()
            .oracle(Arc::new(NullOracle))
            .engagement_repository(repositories.engagements)
            .pattern_repository(repositories.patterns)
            .without_background_tasks()
            .build();
        assert!(matches!(result, Err(EngagementError::Configuration(msg)) if msg.contains("conversation log")));
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let runtime = EngagementRuntime::builder()
            .oracle(Arc::new(NullOracle))
            .repositories(create_repositories(&StorageBackend::InMemory, None).unwrap())
            .build()
            .unwrap();
        assert_eq!(runtime.background_tokens.len(), 2);

        tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
            .await
            .unwrap();
        assert!(runtime.background_tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_from_default_config_uses_in_memory_storage() {
        let runtime = EngagementRuntime::from_config(&EngagementConfigManifest::default())
            .await
            .unwrap();
        assert_eq!(runtime.registry.active_connections().await, 0);
        runtime.shutdown().await;
    }
}
