// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the engagement runtime.
//!
//! Each test wires a runtime with in-memory storage and a scripted oracle
//! that answers by schema: decision, outcome score or content summary.

use async_trait::async_trait;
use kindred_core::application::repository_factory::{create_repositories, Repositories};
use kindred_core::application::{DecisionEngine, EngagementRuntime, LearningService};
use kindred_core::domain::config::LearningConfig;
use kindred_core::domain::connection::{CloseReason, ConnectionError, ConnectionHandle, ConnectionId};
use kindred_core::domain::context::{EngagementContext, PsychologicalState};
use kindred_core::domain::decision::Timing;
use kindred_core::domain::delivery::{DeliveryOutcome, UndeliveredReason};
use kindred_core::domain::oracle::{Oracle, OracleError, OracleOptions};
use kindred_core::domain::pattern::PatternType;
use kindred_core::domain::repository::{ConversationLog, PatternRepository, StorageBackend};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers each request according to the schema it was given.
struct ScriptedOracle {
    decision: Option<Value>,
    success_score: f64,
    hang_decisions: bool,
}

impl ScriptedOracle {
    fn deciding(decision: Value) -> Self {
        Self {
            decision: Some(decision),
            success_score: 0.9,
            hang_decisions: false,
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate_structured(
        &self,
        _prompt: &str,
        schema: &Value,
        _options: &OracleOptions,
    ) -> Result<Value, OracleError> {
        let properties = &schema["properties"];
        if properties.get("shouldEngage").is_some() {
            if self.hang_decisions {
                std::future::pending::<()>().await;
            }
            return self
                .decision
                .clone()
                .ok_or_else(|| OracleError::Provider("no decision scripted".into()));
        }
        if properties.get("successScore").is_some() {
            return Ok(json!({ "successScore": self.success_score }));
        }
        Ok(json!({
            "tone": "warm",
            "contentType": "check-in",
            "pattern": "short question about the user's day",
            "keyPhrases": ["how did it go"],
            "confidence": 0.75
        }))
    }

    async fn health_check(&self) -> Result<(), OracleError> {
        Ok(())
    }
}

#[derive(Default)]
struct ClientSocket {
    id: ConnectionId,
    received: Mutex<Vec<String>>,
    closed: AtomicBool,
}

#[async_trait]
impl ConnectionHandle for ClientSocket {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.received.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self, _reason: CloseReason) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

fn runtime_with_stores(oracle: ScriptedOracle) -> (EngagementRuntime, Repositories) {
    let repositories = create_repositories(&StorageBackend::InMemory, None).unwrap();
    let runtime = EngagementRuntime::builder()
        .oracle(Arc::new(oracle))
        .repositories(repositories.clone())
        .learning_config(LearningConfig::default())
        .without_background_tasks()
        .build()
        .unwrap();
    (runtime, repositories)
}

fn runtime(oracle: ScriptedOracle) -> EngagementRuntime {
    runtime_with_stores(oracle).0
}

fn context(message: &str) -> EngagementContext {
    EngagementContext::new("session-1", "user-1", "persona-1", message).with_psychological_state(PsychologicalState {
        emotion: Some("tired".into()),
        energy_level: Some(3.0),
        motivations: vec!["rest".into()],
        signals: Map::new(),
    })
}

#[tokio::test]
async fn explicit_request_overrides_negative_decision() {
    let runtime = runtime(ScriptedOracle::deciding(json!({
        "shouldEngage": false,
        "timing": "none",
        "reasoning": "user seems exhausted, leave them alone",
        "messageContent": null,
        "confidence": 0.8
    })));

    let result = runtime
        .coordinator
        .handle_turn(&context("I'm wiped out. Message me in 10 minutes though"))
        .await
        .unwrap();

    assert!(result.decision.should_engage);
    assert!(result.decision.delay_seconds().unwrap() >= 300);
    assert!(!result.decision.message_content.unwrap_or_default().is_empty());
    assert!(matches!(result.outcome, Some(DeliveryOutcome::Scheduled { .. })));
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn oracle_timeout_yields_exact_fallback() {
    let runtime = runtime(ScriptedOracle {
        decision: None,
        success_score: 0.5,
        hang_decisions: true,
    });

    let result = runtime.coordinator.handle_turn(&context("ok")).await.unwrap();

    assert!(!result.decision.should_engage);
    assert_eq!(result.decision.timing, Timing::None);
    assert_eq!(result.decision.message_content, None);
    assert_eq!(result.decision.confidence, 0.0);
    assert!(result.outcome.is_none());
}

#[tokio::test]
async fn offline_user_message_is_kept_pending() {
    let runtime = runtime(ScriptedOracle::deciding(json!({
        "shouldEngage": true,
        "timing": "immediate",
        "reasoning": "follow up on the exam",
        "messageContent": "Good luck today!",
        "confidence": 0.7
    })));

    let result = runtime.coordinator.handle_turn(&context("exam today")).await.unwrap();
    let outcome = result.outcome.unwrap();
    assert!(!outcome.delivered());
    assert_eq!(outcome.reason(), Some(UndeliveredReason::UserOffline));

    let pending = runtime.conversation_log.list_undelivered("user-1").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "Good luck today!");
    assert_eq!(pending[0].engagement_id, Some(outcome.engagement_id()));
}

#[tokio::test]
async fn five_successful_two_minute_waits_produce_timing_pattern() {
    let (runtime, stores) = runtime_with_stores(ScriptedOracle::deciding(json!({
        "shouldEngage": true,
        "timing": "wait_2m",
        "reasoning": "give them a moment",
        "messageContent": "How did it go?",
        "confidence": 0.7
    })));
    let ctx = context("heading into the meeting");

    for _ in 0..5 {
        let decision = runtime.decision_engine.evaluate(&ctx, &[]).await;
        let id = runtime.learning_service.record_decision(&decision, &ctx).await.unwrap();
        runtime
            .learning_service
            .analyze_outcome(id, "It went great, thank you!", 40.0)
            .await
            .unwrap();
    }

    let timing = stores
        .patterns
        .list_applicable("persona-1", Some(PatternType::Timing), 0.0, 10)
        .await
        .unwrap();
    assert_eq!(timing.len(), 1);
    assert_eq!(timing[0].confidence_score, 0.5);
    assert_eq!(timing[0].sample_size, 5);
    assert_eq!(timing[0].pattern_data["optimalDelaySeconds"], json!(120));

    // five samples stay below the relevance threshold
    let relevant = runtime
        .learning_service
        .get_relevant_patterns("persona-1", Some(PatternType::Timing))
        .await
        .unwrap();
    assert!(relevant.is_empty());

    let again = runtime.learning_service.extract_patterns("persona-1").await.unwrap();
    assert!(again.is_empty(), "records must not be extracted twice");
}

#[tokio::test(start_paused = true)]
async fn scheduled_message_reaches_connected_user_and_learns() {
    let runtime = runtime(ScriptedOracle::deciding(json!({
        "shouldEngage": true,
        "timing": "wait_30s",
        "reasoning": "short pause before checking in",
        "messageContent": "Did the recipe work out?",
        "confidence": 0.65
    })));
    let socket = Arc::new(ClientSocket::default());
    runtime.registry.register("user-1", socket.clone()).await;

    let result = runtime.coordinator.handle_turn(&context("cooking now")).await.unwrap();
    let Some(DeliveryOutcome::Scheduled { engagement_id, delay_seconds, .. }) = result.outcome else {
        panic!("expected a scheduled delivery");
    };
    assert_eq!(delay_seconds, 30);
    assert_eq!(runtime.scheduler.get_analytics(Some("session-1")).await.pending_schedules, 1);

    tokio::time::sleep(Duration::from_secs(31)).await;

    let received = socket.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let frame: Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(frame["type"], "proactive");
    assert_eq!(frame["content"], "Did the recipe work out?");
    assert_eq!(frame["engagementId"], json!(engagement_id));

    let score = runtime
        .learning_service
        .analyze_outcome(engagement_id, "yes! it was delicious", 20.0)
        .await
        .unwrap();
    assert_eq!(score, 0.9);

    runtime.shutdown().await;
    assert!(!socket.is_open());
}
