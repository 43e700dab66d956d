// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Learning Service
//!
//! Persists every decision as an engagement record, scores the outcome once
//! the user responds, and mines scored records into learned patterns that
//! feed the next decision.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Collaborators:**
//!   - Domain: `EngagementRecord`, `LearnedPattern`, `sentiment::classify`
//!   - Infrastructure: `EngagementRepository`, `PatternRepository`, `Oracle`, `EventBus`
//!
//! # Outcome flow
//!
//! 1. Load the record; reject it unless it is still pending
//! 2. Classify sentiment lexically
//! 3. Ask the oracle for a success score under the scoring timeout (0.5 on failure)
//! 4. Persist the outcome if the record is still pending (a concurrent score
//!    or expiry keeps its write) and publish `OutcomeScored`
//! 5. Enqueue extraction for the persona, or run it inline when no queue is wired.
//!    Extraction errors are logged and never fail the outcome.
//!
//! # Extraction gate
//!
//! Extraction runs once the most recent `extraction_window` records hold at
//! least `extraction_min_records` scored, not-yet-extracted records for the
//! persona. Every processed record is flagged extracted exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::error::EngagementError;
use crate::application::learning_worker::{LearningTask, LearningTaskQueue};
use crate::application::pattern_extraction::{
    self, content_pattern_from_value, content_prompt, content_schema, ExtractionThresholds, Partition,
};
use crate::domain::config::{LearningConfig, OracleConfig};
use crate::domain::context::EngagementContext;
use crate::domain::decision::{clamp_unit, EngagementDecision};
use crate::domain::engagement::{EngagementId, EngagementOutcome, EngagementRecord};
use crate::domain::events::EngagementEvent;
use crate::domain::oracle::{generate_with_timeout, Oracle, OracleOptions};
use crate::domain::pattern::{LearnedPattern, PatternType};
use crate::domain::repository::{EngagementRepository, PatternRepository, RepositoryError};
use crate::domain::sentiment;
use crate::infrastructure::event_bus::EventBus;

/// Score used when the oracle cannot rate an outcome
pub const DEFAULT_SUCCESS_SCORE: f64 = 0.5;

#[async_trait]
pub trait LearningService: Send + Sync {
    /// Persist a decision as a pending engagement record.
    async fn record_decision(
        &self,
        decision: &EngagementDecision,
        context: &EngagementContext,
    ) -> Result<EngagementId, EngagementError>;

    /// Score the user's response and persist the outcome. Returns the success score.
    async fn analyze_outcome(
        &self,
        engagement_id: EngagementId,
        response_text: &str,
        response_time_seconds: f64,
    ) -> Result<f64, EngagementError>;

    /// Mine the persona's scored records into patterns. Returns what was persisted.
    async fn extract_patterns(&self, personality_id: &str) -> anyhow::Result<Vec<LearnedPattern>>;

    async fn get_relevant_patterns(
        &self,
        personality_id: &str,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<LearnedPattern>, EngagementError>;

    /// Close records that stayed pending past the TTL. Returns how many.
    async fn expire_stale_pending(&self, now: DateTime<Utc>) -> Result<usize, EngagementError>;
}

#[derive(Debug, Clone)]
pub struct LearningSettings {
    pub extraction_min_records: usize,
    pub extraction_window: usize,
    pub thresholds: ExtractionThresholds,
    pub pattern_confidence_threshold: f64,
    pub max_relevant_patterns: usize,
    pub pending_ttl: chrono::Duration,
    pub scoring_options: OracleOptions,
}

impl LearningSettings {
    pub fn from_config(learning: &LearningConfig, oracle: &OracleConfig) -> Self {
        Self {
            extraction_min_records: learning.extraction_min_records,
            extraction_window: learning.extraction_window,
            thresholds: ExtractionThresholds {
                success_threshold: learning.success_threshold,
                failure_threshold: learning.failure_threshold,
                min_successful_samples: learning.min_successful_samples,
            },
            pattern_confidence_threshold: learning.pattern_confidence_threshold,
            max_relevant_patterns: learning.max_relevant_patterns,
            pending_ttl: learning.pending_ttl(),
            scoring_options: oracle.scoring_options(),
        }
    }
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self::from_config(&LearningConfig::default(), &OracleConfig::default())
    }
}

pub struct StandardLearningService {
    engagements: Arc<dyn EngagementRepository>,
    patterns: Arc<dyn PatternRepository>,
    oracle: Arc<dyn Oracle>,
    event_bus: EventBus,
    settings: LearningSettings,
    task_queue: Option<LearningTaskQueue>,
    // serializes extraction so concurrent triggers never process a record twice
    extraction_lock: tokio::sync::Mutex<()>,
}

impl StandardLearningService {
    pub fn new(
        engagements: Arc<dyn EngagementRepository>,
        patterns: Arc<dyn PatternRepository>,
        oracle: Arc<dyn Oracle>,
        event_bus: EventBus,
        settings: LearningSettings,
    ) -> Self {
        Self {
            engagements,
            patterns,
            oracle,
            event_bus,
            settings,
            task_queue: None,
            extraction_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_task_queue(mut self, queue: LearningTaskQueue) -> Self {
        self.task_queue = Some(queue);
        self
    }

    async fn score_outcome(&self, record: &EngagementRecord, response_text: &str, response_time_seconds: f64) -> f64 {
        let prompt = format!(
            "Rate how well this unsolicited message landed, from 0 (ignored or unwelcome) to 1 (clearly welcome).\n\n\
             Proactive message: {}\n\
             Scheduled delay: {} seconds\n\
             Why it was sent: {}\n\
             User response: {}\n\
             Response latency: {:.0} seconds",
            record.proactive_content,
            record.scheduled_delay_seconds,
            record.decision_reasoning,
            response_text,
            response_time_seconds,
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "successScore": { "type": "number", "minimum": 0, "maximum": 1 },
                "rationale": { "type": "string" }
            },
            "required": ["successScore"]
        });

        match generate_with_timeout(self.oracle.as_ref(), &prompt, &schema, &self.settings.scoring_options).await {
            Ok(value) => match read_score(&value) {
                Some(score) => score,
                None => {
                    warn!(engagement_id = %record.id, "Oracle score missing, using default");
                    DEFAULT_SUCCESS_SCORE
                }
            },
            Err(e) => {
                warn!(engagement_id = %record.id, error = %e, "Outcome scoring failed, using default");
                DEFAULT_SUCCESS_SCORE
            }
        }
    }

    async fn schedule_extraction(&self, personality_id: &str) {
        match &self.task_queue {
            Some(queue) => {
                queue.enqueue(LearningTask::ExtractPatterns {
                    personality_id: personality_id.to_string(),
                });
            }
            None => {
                if let Err(e) = self.extract_patterns(personality_id).await {
                    warn!(personality_id = %personality_id, error = %e, "Pattern extraction failed");
                }
            }
        }
    }

    async fn closed_outcome_error(&self, engagement_id: EngagementId) -> EngagementError {
        match self.engagements.find_by_id(engagement_id).await {
            Ok(Some(current)) => match current.ensure_awaiting_outcome() {
                Err(state) => EngagementError::InvalidState(state),
                Ok(()) => EngagementError::NotFound(engagement_id),
            },
            Ok(None) => EngagementError::NotFound(engagement_id),
            Err(e) => EngagementError::persistence("-", Some(engagement_id), e),
        }
    }

    async fn extract_content(&self, personality_id: &str, partition: &Partition<'_>) -> Option<LearnedPattern> {
        if partition.successful.len() < self.settings.thresholds.min_successful_samples {
            return None;
        }
        let prompt = content_prompt(partition);
        match generate_with_timeout(
            self.oracle.as_ref(),
            &prompt,
            &content_schema(),
            &self.settings.scoring_options,
        )
        .await
        {
            Ok(value) => content_pattern_from_value(personality_id, &value, partition.successful.len()),
            Err(e) => {
                warn!(personality_id = %personality_id, error = %e, "Content summary failed");
                None
            }
        }
    }
}

fn read_score(value: &Value) -> Option<f64> {
    let raw = value.get("successScore").or_else(|| value.get("score"))?;
    let score = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))?;
    Some(clamp_unit(score))
}

#[async_trait]
impl LearningService for StandardLearningService {
    async fn record_decision(
        &self,
        decision: &EngagementDecision,
        context: &EngagementContext,
    ) -> Result<EngagementId, EngagementError> {
        let record = EngagementRecord::from_decision(decision, context);
        self.engagements
            .insert(&record)
            .await
            .map_err(|e| EngagementError::persistence(&context.session_id, Some(record.id), e))?;

        debug!(engagement_id = %record.id, session_id = %record.session_id, "Engagement recorded");
        self.event_bus.publish(EngagementEvent::EngagementRecorded {
            engagement_id: record.id,
            session_id: record.session_id.clone(),
            personality_id: record.personality_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(record.id)
    }

    async fn analyze_outcome(
        &self,
        engagement_id: EngagementId,
        response_text: &str,
        response_time_seconds: f64,
    ) -> Result<f64, EngagementError> {
        let mut record = self
            .engagements
            .find_by_id(engagement_id)
            .await
            .map_err(|e| EngagementError::persistence("-", Some(engagement_id), e))?
            .ok_or(EngagementError::NotFound(engagement_id))?;
        record.ensure_awaiting_outcome()?;

        let response_time_seconds = if response_time_seconds.is_finite() {
            response_time_seconds.max(0.0)
        } else {
            0.0
        };
        let sentiment = sentiment::classify(response_text);
        let success_score = self.score_outcome(&record, response_text, response_time_seconds).await;

        let outcome = EngagementOutcome {
            responded_at: Utc::now(),
            user_response_text: response_text.to_string(),
            response_time_seconds,
            sentiment,
            success_score,
        };
        record.apply_outcome(&outcome)?;
        match self.engagements.update_outcome(engagement_id, &outcome).await {
            Ok(()) => {}
            // scored or expired while the oracle was rating this response
            Err(RepositoryError::NotFound(_)) => return Err(self.closed_outcome_error(engagement_id).await),
            Err(e) => return Err(EngagementError::persistence(&record.session_id, Some(engagement_id), e)),
        }

        info!(
            engagement_id = %engagement_id,
            sentiment = sentiment.as_str(),
            success_score,
            "Engagement outcome scored"
        );
        counter!("kindred_outcomes_scored_total", "sentiment" => sentiment.as_str()).increment(1);
        self.event_bus.publish(EngagementEvent::OutcomeScored {
            engagement_id,
            sentiment,
            success_score,
            timestamp: Utc::now(),
        });

        self.schedule_extraction(&record.personality_id).await;
        Ok(success_score)
    }

    async fn extract_patterns(&self, personality_id: &str) -> anyhow::Result<Vec<LearnedPattern>> {
        let _guard = self.extraction_lock.lock().await;

        let recent = self.engagements.list_recent(self.settings.extraction_window).await?;
        let candidates: Vec<EngagementRecord> = recent
            .into_iter()
            .filter(|r| r.personality_id == personality_id && r.is_extractable())
            .collect();

        if candidates.len() < self.settings.extraction_min_records {
            debug!(
                personality_id = %personality_id,
                candidates = candidates.len(),
                "Not enough records for extraction"
            );
            return Ok(Vec::new());
        }

        let thresholds = &self.settings.thresholds;
        let partition = Partition::new(&candidates, thresholds);

        let mut extracted = Vec::new();
        extracted.extend(pattern_extraction::extract_timing(personality_id, &partition, thresholds));
        extracted.extend(self.extract_content(personality_id, &partition).await);
        extracted.extend(pattern_extraction::extract_context(personality_id, &partition, thresholds));

        // records are flagged before any pattern is written and are never mined twice
        let processed: Vec<EngagementId> = candidates.iter().map(|r| r.id).collect();
        self.engagements.mark_extracted(&processed).await?;

        for pattern in &extracted {
            self.patterns.insert(pattern).await?;
        }

        for pattern in &extracted {
            counter!("kindred_patterns_extracted_total", "type" => pattern.pattern_type.as_str()).increment(1);
            self.event_bus.publish(EngagementEvent::PatternExtracted {
                pattern_id: pattern.id,
                personality_id: pattern.personality_id.clone(),
                pattern_type: pattern.pattern_type,
                confidence: pattern.confidence_score,
                sample_size: pattern.sample_size,
                timestamp: Utc::now(),
            });
        }

        info!(
            personality_id = %personality_id,
            processed = processed.len(),
            patterns = extracted.len(),
            "Pattern extraction completed"
        );
        Ok(extracted)
    }

    async fn get_relevant_patterns(
        &self,
        personality_id: &str,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<LearnedPattern>, EngagementError> {
        self.patterns
            .list_applicable(
                personality_id,
                pattern_type,
                self.settings.pattern_confidence_threshold,
                self.settings.max_relevant_patterns,
            )
            .await
            .map_err(|e| EngagementError::persistence("-", None, e))
    }

    async fn expire_stale_pending(&self, now: DateTime<Utc>) -> Result<usize, EngagementError> {
        let cutoff = now - self.settings.pending_ttl;
        let stale = self
            .engagements
            .list_pending_before(cutoff)
            .await
            .map_err(|e| EngagementError::persistence("-", None, e))?;

        let mut expired = 0;
        let mut personas = BTreeSet::new();
        for record in stale {
            match self.engagements.mark_expired(record.id, now).await {
                Ok(()) => {
                    expired += 1;
                    personas.insert(record.personality_id.clone());
                    self.event_bus.publish(EngagementEvent::PendingExpired {
                        engagement_id: record.id,
                        timestamp: now,
                    });
                }
                // scored between listing and expiring
                Err(RepositoryError::NotFound(_)) => continue,
                Err(e) => return Err(EngagementError::persistence(&record.session_id, Some(record.id), e)),
            }
        }

        for persona in personas {
            self.schedule_extraction(&persona).await;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::PsychologicalState;
    use crate::domain::decision::Timing;
    use crate::domain::engagement::{EngagementStateError, Sentiment};
    use crate::domain::oracle::OracleError;
    use crate::infrastructure::repositories::{InMemoryEngagementRepository, InMemoryPatternRepository};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Answers scoring prompts with a fixed score and content prompts with a
    /// confident summary. Scoring answers can be delayed.
    struct StubOracle {
        score: Option<f64>,
        latency: Option<std::time::Duration>,
        content_calls: AtomicUsize,
    }

    impl StubOracle {
        fn scoring(score: Option<f64>) -> Self {
            Self {
                score,
                latency: None,
                content_calls: AtomicUsize::new(0),
            }
        }

        fn slow(score: f64) -> Self {
            Self {
                latency: Some(std::time::Duration::from_millis(200)),
                ..Self::scoring(Some(score))
            }
        }

        fn content_calls(&self) -> usize {
            self.content_calls.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait]
    impl Oracle for StubOracle {
        async fn generate_structured(
            &self,
            prompt: &str,
            _schema: &Value,
            _options: &OracleOptions,
        ) -> Result<Value, OracleError> {
            if prompt.starts_with("These proactive messages") {
                self.content_calls.fetch_add(1, AtomicOrdering::SeqCst);
                return Ok(json!({
                    "tone": "warm",
                    "contentType": "question",
                    "pattern": "asks a gentle follow-up",
                    "keyPhrases": ["how did it go"],
                    "confidence": 0.8
                }));
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            match self.score {
                Some(score) => Ok(json!({ "successScore": score })),
                None => Err(OracleError::Network("down".into())),
            }
        }

        async fn health_check(&self) -> Result<(), OracleError> {
            Ok(())
        }
    }

    struct Fixture {
        service: StandardLearningService,
        engagements: InMemoryEngagementRepository,
        patterns: InMemoryPatternRepository,
    }

    fn fixture(score: Option<f64>) -> Fixture {
        let engagements = InMemoryEngagementRepository::new();
        let patterns = InMemoryPatternRepository::new();
        let service = service_with(
            &engagements,
            Arc::new(patterns.clone()),
            Arc::new(StubOracle::scoring(score)),
        );
        Fixture {
            service,
            engagements,
            patterns,
        }
    }

    fn service_with(
        engagements: &InMemoryEngagementRepository,
        patterns: Arc<dyn PatternRepository>,
        oracle: Arc<dyn Oracle>,
    ) -> StandardLearningService {
        StandardLearningService::new(
            Arc::new(engagements.clone()),
            patterns,
            oracle,
            EventBus::new(64),
            LearningSettings::default(),
        )
    }

    /// Pattern store whose n-th insert fails.
    struct FailingPatternRepository {
        inner: InMemoryPatternRepository,
        inserts: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl PatternRepository for FailingPatternRepository {
        async fn insert(&self, pattern: &LearnedPattern) -> Result<(), RepositoryError> {
            if self.inserts.fetch_add(1, AtomicOrdering::SeqCst) + 1 == self.fail_on {
                return Err(RepositoryError::Database("connection reset".into()));
            }
            self.inner.insert(pattern).await
        }

        async fn list_applicable(
            &self,
            personality_id: &str,
            pattern_type: Option<PatternType>,
            threshold: f64,
            limit: usize,
        ) -> Result<Vec<LearnedPattern>, RepositoryError> {
            self.inner
                .list_applicable(personality_id, pattern_type, threshold, limit)
                .await
        }
    }

    async fn seed_scored(engagements: &InMemoryEngagementRepository, scores: &[f64]) {
        for &score in scores {
            let mut record = EngagementRecord::from_decision(&decision(Timing::Wait2m), &context("p1"));
            record
                .apply_outcome(&EngagementOutcome {
                    responded_at: Utc::now(),
                    user_response_text: "ok".into(),
                    response_time_seconds: 5.0,
                    sentiment: Sentiment::Neutral,
                    success_score: score,
                })
                .unwrap();
            engagements.insert(&record).await.unwrap();
        }
    }

    fn decision(timing: Timing) -> EngagementDecision {
        EngagementDecision {
            should_engage: true,
            timing,
            reasoning: "check on the interview".into(),
            message_content: Some("How did the interview go?".into()),
            confidence: 0.7,
            context_analysis: Map::new(),
        }
    }

    fn context(persona: &str) -> EngagementContext {
        EngagementContext::new("s1", "u1", persona, "I have an interview soon").with_psychological_state(
            PsychologicalState {
                emotion: Some("nervous".into()),
                energy_level: Some(5.0),
                motivations: vec!["career".into()],
                signals: Map::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_record_decision_persists_pending_record() {
        let f = fixture(Some(0.9));
        let id = f
            .service
            .record_decision(&decision(Timing::Wait2m), &context("p1"))
            .await
            .unwrap();
        let record = f.engagements.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.scheduled_delay_seconds, 120);
        assert!(record.success_score.is_none());
        assert!(!record.learning_extracted);
    }

    #[tokio::test]
    async fn test_analyze_outcome_scores_and_classifies() {
        let f = fixture(Some(0.85));
        let id = f
            .service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();

        let score = f
            .service
            .analyze_outcome(id, "It went great, thanks!", 42.0)
            .await
            .unwrap();
        assert_eq!(score, 0.85);

        let record = f.engagements.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.sentiment, Some(Sentiment::Positive));
        assert_eq!(record.response_time_seconds, Some(42.0));
        assert_eq!(record.success_score, Some(0.85));
    }

    #[tokio::test]
    async fn test_oracle_failure_scores_default() {
        let f = fixture(None);
        let id = f
            .service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();
        let score = f.service.analyze_outcome(id, "ok", 3.0).await.unwrap();
        assert_eq!(score, DEFAULT_SUCCESS_SCORE);
    }

    #[tokio::test]
    async fn test_outcome_written_once() {
        let f = fixture(Some(0.9));
        let id = f
            .service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();
        f.service.analyze_outcome(id, "yes", 1.0).await.unwrap();
        let second = f.service.analyze_outcome(id, "again", 1.0).await;
        assert!(matches!(
            second,
            Err(EngagementError::InvalidState(EngagementStateError::AlreadyScored(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_outcomes_score_once() {
        let engagements = InMemoryEngagementRepository::new();
        let service = service_with(
            &engagements,
            Arc::new(InMemoryPatternRepository::new()),
            Arc::new(StubOracle::slow(0.9)),
        );
        let id = service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();

        let first = service.analyze_outcome(id, "thanks!", 10.0);
        tokio::pin!(first);
        assert!(futures::poll!(&mut first).is_pending());

        let second = service.analyze_outcome(id, "sorry, ignore that", 11.0).await;
        assert_eq!(second.unwrap(), 0.9);
        assert!(matches!(
            first.await,
            Err(EngagementError::InvalidState(EngagementStateError::AlreadyScored(_)))
        ));

        let record = engagements.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.success_score, Some(0.9));
        assert_eq!(record.user_response_text.as_deref(), Some("sorry, ignore that"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_during_scoring_wins() {
        let engagements = InMemoryEngagementRepository::new();
        let service = service_with(
            &engagements,
            Arc::new(InMemoryPatternRepository::new()),
            Arc::new(StubOracle::slow(0.9)),
        );
        let id = service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::hours(25);
        let scoring = service.analyze_outcome(id, "thanks!", 10.0);
        tokio::pin!(scoring);
        assert!(futures::poll!(&mut scoring).is_pending());

        assert_eq!(service.expire_stale_pending(later).await.unwrap(), 1);
        assert!(matches!(
            scoring.await,
            Err(EngagementError::InvalidState(EngagementStateError::Expired(_)))
        ));

        let record = engagements.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.success_score, Some(0.0));
        assert!(record.expired_at.is_some());
        assert!(record.user_response_text.is_none());
    }

    #[tokio::test]
    async fn test_unknown_engagement_is_not_found() {
        let f = fixture(Some(0.9));
        let result = f.service.analyze_outcome(EngagementId::new(), "hi", 1.0).await;
        assert!(matches!(result, Err(EngagementError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_extraction_waits_for_five_scored_records() {
        let f = fixture(Some(0.9));
        for i in 0..5 {
            let id = f
                .service
                .record_decision(&decision(Timing::Wait2m), &context("p1"))
                .await
                .unwrap();
            f.service.analyze_outcome(id, "thanks!", 30.0).await.unwrap();

            let stored = f.patterns.list_applicable("p1", None, 0.0, 10).await.unwrap();
            if i < 4 {
                assert!(stored.is_empty(), "extracted after {} records", i + 1);
            } else {
                let types: BTreeSet<&str> = stored.iter().map(|p| p.pattern_type.as_str()).collect();
                assert_eq!(types, BTreeSet::from(["content", "context", "timing"]));
            }
        }

        let recent = f.engagements.list_recent(25).await.unwrap();
        assert!(recent.iter().all(|r| r.learning_extracted));
    }

    #[tokio::test]
    async fn test_extracted_records_are_never_reprocessed() {
        let f = fixture(Some(0.9));
        for _ in 0..5 {
            let id = f
                .service
                .record_decision(&decision(Timing::Wait2m), &context("p1"))
                .await
                .unwrap();
            f.service.analyze_outcome(id, "thanks!", 30.0).await.unwrap();
        }
        let again = f.service.extract_patterns("p1").await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_failed_pattern_write_does_not_reprocess_records() {
        let engagements = InMemoryEngagementRepository::new();
        let stored = InMemoryPatternRepository::new();
        let service = service_with(
            &engagements,
            Arc::new(FailingPatternRepository {
                inner: stored.clone(),
                inserts: AtomicUsize::new(0),
                fail_on: 2,
            }),
            Arc::new(StubOracle::scoring(Some(0.9))),
        );
        for _ in 0..5 {
            let id = service
                .record_decision(&decision(Timing::Wait2m), &context("p1"))
                .await
                .unwrap();
            service.analyze_outcome(id, "thanks!", 30.0).await.unwrap();
        }

        let recent = engagements.list_recent(25).await.unwrap();
        assert!(recent.iter().all(|r| r.learning_extracted));
        assert_eq!(stored.list_applicable("p1", None, 0.0, 10).await.unwrap().len(), 1);

        assert!(service.extract_patterns("p1").await.unwrap().is_empty());
        assert_eq!(stored.list_applicable("p1", None, 0.0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_content_summary_needs_three_successes() {
        for successes in 0..=3usize {
            let engagements = InMemoryEngagementRepository::new();
            let oracle = Arc::new(StubOracle::scoring(Some(0.9)));
            let service = service_with(&engagements, Arc::new(InMemoryPatternRepository::new()), oracle.clone());
            let scores: Vec<f64> = (0..5).map(|i| if i < successes { 0.9 } else { 0.1 }).collect();
            seed_scored(&engagements, &scores).await;

            let extracted = service.extract_patterns("p1").await.unwrap();
            let has_content = extracted.iter().any(|p| p.pattern_type == PatternType::Content);

            assert_eq!(oracle.content_calls(), usize::from(successes >= 3), "successes = {successes}");
            assert_eq!(has_content, successes >= 3, "successes = {successes}");
        }
    }

    #[tokio::test]
    async fn test_other_personas_do_not_count_toward_gate() {
        let f = fixture(Some(0.9));
        for i in 0..5 {
            let persona = if i % 2 == 0 { "p1" } else { "p2" };
            let id = f
                .service
                .record_decision(&decision(Timing::Wait2m), &context(persona))
                .await
                .unwrap();
            f.service.analyze_outcome(id, "thanks!", 30.0).await.unwrap();
        }
        assert!(f.patterns.list_applicable("p1", None, 0.0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relevant_patterns_filtered_by_confidence() {
        let f = fixture(Some(0.9));
        for confidence in [0.3, 0.65, 0.9] {
            f.patterns
                .insert(&LearnedPattern::new("p1", PatternType::Timing, Map::new(), Map::new(), confidence, 5))
                .await
                .unwrap();
        }
        let relevant = f.service.get_relevant_patterns("p1", None).await.unwrap();
        assert_eq!(relevant.len(), 2);
        assert!(relevant.iter().all(|p| p.confidence_score >= 0.6));
    }

    #[tokio::test]
    async fn test_stale_pending_records_expire() {
        let f = fixture(Some(0.9));
        let stale = f
            .service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(f.service.expire_stale_pending(later).await.unwrap(), 1);
        assert_eq!(f.service.expire_stale_pending(later).await.unwrap(), 0);

        let record = f.engagements.find_by_id(stale).await.unwrap().unwrap();
        assert_eq!(record.success_score, Some(0.0));
        assert!(record.expired_at.is_some());

        let late_reply = f.service.analyze_outcome(stale, "sorry, just saw this", 90_000.0).await;
        assert!(matches!(
            late_reply,
            Err(EngagementError::InvalidState(EngagementStateError::Expired(_)))
        ));
    }

    #[tokio::test]
    async fn test_fresh_pending_records_survive_sweep() {
        let f = fixture(Some(0.9));
        f.service
            .record_decision(&decision(Timing::Immediate), &context("p1"))
            .await
            .unwrap();
        assert_eq!(f.service.expire_stale_pending(Utc::now()).await.unwrap(), 0);
    }
}
