// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engagement Coordinator
//!
//! Runs one conversation turn through the whole subsystem: relevant
//! patterns → decision → record + delivery.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::decision_engine::DecisionEngine;
use crate::application::delivery_scheduler::DeliveryScheduler;
use crate::application::error::EngagementError;
use crate::application::learning_service::LearningService;
use crate::domain::context::EngagementContext;
use crate::domain::decision::EngagementDecision;
use crate::domain::delivery::DeliveryOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub decision: EngagementDecision,
    /// `None` when the decision did not engage.
    pub outcome: Option<DeliveryOutcome>,
}

pub struct EngagementCoordinator {
    decision_engine: Arc<dyn DecisionEngine>,
    learning_service: Arc<dyn LearningService>,
    scheduler: Arc<DeliveryScheduler>,
    pattern_limit: usize,
}

impl EngagementCoordinator {
    pub fn new(
        decision_engine: Arc<dyn DecisionEngine>,
        learning_service: Arc<dyn LearningService>,
        scheduler: Arc<DeliveryScheduler>,
        pattern_limit: usize,
    ) -> Self {
        Self {
            decision_engine,
            learning_service,
            scheduler,
            pattern_limit,
        }
    }

    pub async fn handle_turn(&self, context: &EngagementContext) -> Result<TurnResult, EngagementError> {
        // Decisions still run without patterns when the store is unavailable
        let mut patterns = match self
            .learning_service
            .get_relevant_patterns(&context.personality_id, None)
            .await
        {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(session_id = %context.session_id, error = %e, "Pattern lookup failed");
                Vec::new()
            }
        };
        patterns.truncate(self.pattern_limit);

        let decision = self.decision_engine.evaluate(context, &patterns).await;
        debug!(
            session_id = %context.session_id,
            should_engage = decision.should_engage,
            timing = decision.timing.as_str(),
            patterns = patterns.len(),
            "Turn evaluated"
        );

        let outcome = self.scheduler.process_decision(&decision, context).await?;
        Ok(TurnResult { decision, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::learning_service::{LearningSettings, StandardLearningService};
    use crate::domain::decision::Timing;
    use crate::domain::pattern::{LearnedPattern, PatternType};
    use crate::domain::repository::PatternRepository;
    use crate::domain::oracle::{Oracle, OracleError, OracleOptions};
    use crate::infrastructure::connection_registry::ConnectionRegistry;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryConversationLog, InMemoryEngagementRepository, InMemoryPatternRepository,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Map, Value};

    /// Engine that remembers how many patterns it was shown.
    struct ScriptedEngine {
        decision: EngagementDecision,
        seen_patterns: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DecisionEngine for ScriptedEngine {
        async fn evaluate(&self, _context: &EngagementContext, patterns: &[LearnedPattern]) -> EngagementDecision {
            self.seen_patterns.lock().push(patterns.len());
            self.decision.clone()
        }
    }

    struct NoOracle;

    #[async_trait]
    impl Oracle for NoOracle {
        async fn generate_structured(&self, _: &str, _: &Value, _: &OracleOptions) -> Result<Value, OracleError> {
            Err(OracleError::Network("offline".into()))
        }

        async fn health_check(&self) -> Result<(), OracleError> {
            Err(OracleError::Network("offline".into()))
        }
    }

    async fn coordinator(decision: EngagementDecision) -> (EngagementCoordinator, Arc<ScriptedEngine>) {
        let bus = EventBus::new(16);
        let patterns = InMemoryPatternRepository::new();
        for _ in 0..5 {
            patterns
                .insert(&LearnedPattern::new("p1", PatternType::Timing, Map::new(), Map::new(), 0.8, 6))
                .await
                .unwrap();
        }
        let learning = Arc::new(StandardLearningService::new(
            Arc::new(InMemoryEngagementRepository::new()),
            Arc::new(patterns),
            Arc::new(NoOracle),
            bus.clone(),
            LearningSettings::default(),
        ));
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(InMemoryConversationLog::new()), bus.clone()));
        let scheduler = Arc::new(DeliveryScheduler::new(learning.clone(), registry, bus));
        let engine = Arc::new(ScriptedEngine {
            decision,
            seen_patterns: Mutex::new(Vec::new()),
        });
        (EngagementCoordinator::new(engine.clone(), learning, scheduler, 3), engine)
    }

    #[tokio::test]
    async fn test_turn_caps_patterns_and_skips_quiet_decisions() {
        let (coordinator, engine) = coordinator(EngagementDecision::fallback()).await;
        let result = coordinator
            .handle_turn(&EngagementContext::new("s1", "u1", "p1", "ok bye"))
            .await
            .unwrap();

        assert!(result.outcome.is_none());
        assert_eq!(*engine.seen_patterns.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_engaging_turn_reports_offline_outcome() {
        let decision = EngagementDecision {
            should_engage: true,
            timing: Timing::Immediate,
            reasoning: "user asked".into(),
            message_content: Some("Here I am".into()),
            confidence: 0.9,
            context_analysis: Map::new(),
        };
        let (coordinator, _) = coordinator(decision).await;
        let result = coordinator
            .handle_turn(&EngagementContext::new("s1", "u1", "p1", "message me"))
            .await
            .unwrap();

        let outcome = result.outcome.unwrap();
        assert!(!outcome.delivered());
    }
}
