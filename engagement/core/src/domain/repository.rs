// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the engagement subsystem. Only the CRUD contract
//! matters to the application layer; implementations live in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `EngagementRepository` | `EngagementRecord` | `InMemoryEngagementRepository`, `PostgresEngagementRepository` |
//! | `PatternRepository` | `LearnedPattern` | `InMemoryPatternRepository`, `PostgresPatternRepository` |
//! | `ConversationLog` | `ConversationMessage` | `InMemoryConversationLog`, `PostgresConversationLog` |
//!
//! ## Storage Backend Abstraction
//!
//! The concrete backend is selected at startup from `spec.storage.backend`
//! in the engagement configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::delivery::{ConversationMessage, MessageId};
use crate::domain::engagement::{EngagementId, EngagementOutcome, EngagementRecord};
use crate::domain::pattern::{LearnedPattern, PatternType};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Repository interface for engagement records
#[async_trait]
pub trait EngagementRepository: Send + Sync {
    /// Insert a freshly created record
    async fn insert(&self, record: &EngagementRecord) -> Result<(), RepositoryError>;

    /// Write outcome fields onto a pending record. `NotFound` unless the
    /// record exists and is still pending.
    async fn update_outcome(
        &self,
        id: EngagementId,
        outcome: &EngagementOutcome,
    ) -> Result<(), RepositoryError>;

    /// Close a pending record without a response
    async fn mark_expired(&self, id: EngagementId, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Flag records as having contributed to extraction (idempotent)
    async fn mark_extracted(&self, ids: &[EngagementId]) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: EngagementId) -> Result<Option<EngagementRecord>, RepositoryError>;

    /// Most recent records across all personas, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<EngagementRecord>, RepositoryError>;

    /// Most recent records for one persona, newest first
    async fn list_by_persona(
        &self,
        personality_id: &str,
        limit: usize,
    ) -> Result<Vec<EngagementRecord>, RepositoryError>;

    /// Records still awaiting a response that were created before `cutoff`
    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementRecord>, RepositoryError>;
}

/// Repository interface for learned patterns (insert-only)
#[async_trait]
pub trait PatternRepository: Send + Sync {
    async fn insert(&self, pattern: &LearnedPattern) -> Result<(), RepositoryError>;

    /// Patterns for a persona with `confidence_score >= threshold`, highest
    /// confidence first
    async fn list_applicable(
        &self,
        personality_id: &str,
        pattern_type: Option<PatternType>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<LearnedPattern>, RepositoryError>;
}

/// Append-only conversation log
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, message: &ConversationMessage) -> Result<MessageId, RepositoryError>;

    /// Proactive messages persisted while the user was offline, oldest first
    async fn list_undelivered(&self, user_id: &str) -> Result<Vec<ConversationMessage>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
