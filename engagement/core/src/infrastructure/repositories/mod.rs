// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve engagement records, patterns and the conversation log
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresEngagementRepository** - Engagement records and outcomes
//! - **PostgresPatternRepository** - Learned patterns
//! - **PostgresConversationLog** - Proactive message log
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for tests and the `in_memory` backend. Nothing
//! survives a restart.

pub mod postgres_conversation;
pub mod postgres_engagement;
pub mod postgres_pattern;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::delivery::{ConversationMessage, MessageId};
use crate::domain::engagement::{EngagementId, EngagementOutcome, EngagementRecord};
use crate::domain::pattern::{LearnedPattern, PatternType};
use crate::domain::repository::{
    ConversationLog, EngagementRepository, PatternRepository, RepositoryError,
};

pub use postgres_conversation::PostgresConversationLog;
pub use postgres_engagement::PostgresEngagementRepository;
pub use postgres_pattern::PostgresPatternRepository;

/// Stored record plus its insertion sequence, used to order records created
/// within the same clock tick.
#[derive(Clone)]
struct Stored {
    seq: u64,
    record: EngagementRecord,
}

#[derive(Clone, Default)]
pub struct InMemoryEngagementRepository {
    records: Arc<RwLock<HashMap<EngagementId, Stored>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryEngagementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(mut rows: Vec<Stored>) -> Vec<EngagementRecord> {
        rows.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        rows.into_iter().map(|s| s.record).collect()
    }
}

#[async_trait]
impl EngagementRepository for InMemoryEngagementRepository {
    async fn insert(&self, record: &EngagementRecord) -> Result<(), RepositoryError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.write().await;
        records.insert(
            record.id,
            Stored {
                seq,
                record: record.clone(),
            },
        );
        Ok(())
    }

    async fn update_outcome(
        &self,
        id: EngagementId,
        outcome: &EngagementOutcome,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("engagement {}", id)))?;
        stored
            .record
            .apply_outcome(outcome)
            .map_err(|_| RepositoryError::NotFound(format!("pending engagement {}", id)))
    }

    async fn mark_expired(&self, id: EngagementId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&id)
            .filter(|s| s.record.success_score.is_none() && s.record.expired_at.is_none())
            .ok_or_else(|| RepositoryError::NotFound(format!("pending engagement {}", id)))?;
        stored.record.expired_at = Some(at);
        stored.record.success_score = Some(0.0);
        Ok(())
    }

    async fn mark_extracted(&self, ids: &[EngagementId]) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        for id in ids {
            if let Some(stored) = records.get_mut(id) {
                stored.record.mark_extracted();
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: EngagementId) -> Result<Option<EngagementRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&id).map(|s| s.record.clone()))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let records = self.records.read().await;
        let rows = records.values().cloned().collect();
        Ok(Self::newest_first(rows).into_iter().take(limit).collect())
    }

    async fn list_by_persona(
        &self,
        personality_id: &str,
        limit: usize,
    ) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let records = self.records.read().await;
        let rows = records
            .values()
            .filter(|s| s.record.personality_id == personality_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows).into_iter().take(limit).collect())
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut pending: Vec<EngagementRecord> = records
            .values()
            .map(|s| &s.record)
            .filter(|r| r.success_score.is_none() && r.expired_at.is_none() && r.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPatternRepository {
    patterns: Arc<RwLock<Vec<LearnedPattern>>>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn insert(&self, pattern: &LearnedPattern) -> Result<(), RepositoryError> {
        self.patterns.write().await.push(pattern.clone());
        Ok(())
    }

    async fn list_applicable(
        &self,
        personality_id: &str,
        pattern_type: Option<PatternType>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<LearnedPattern>, RepositoryError> {
        let patterns = self.patterns.read().await;
        let mut matching: Vec<LearnedPattern> = patterns
            .iter()
            .filter(|p| p.personality_id == personality_id)
            .filter(|p| pattern_type.map(|t| p.pattern_type == t).unwrap_or(true))
            .filter(|p| p.confidence_score >= threshold)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then(b.created_at.cmp(&a.created_at))
        });
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryConversationLog {
    messages: Arc<RwLock<Vec<ConversationMessage>>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message appended so far, oldest first
    pub async fn all(&self) -> Vec<ConversationMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn append(&self, message: &ConversationMessage) -> Result<MessageId, RepositoryError> {
        self.messages.write().await.push(message.clone());
        Ok(message.id)
    }

    async fn list_undelivered(&self, user_id: &str) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.user_id == user_id && m.proactive && !m.delivered)
            .cloned()
            .collect())
    }
}
