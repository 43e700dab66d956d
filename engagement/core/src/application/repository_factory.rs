// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on the storage backend
//! configuration. A PostgreSQL backend needs a connected pool.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select repository adapters for the configured backend

use sqlx::PgPool;
use std::sync::Arc;

use crate::application::error::EngagementError;
use crate::domain::repository::{ConversationLog, EngagementRepository, PatternRepository, StorageBackend};
use crate::infrastructure::repositories::{
    InMemoryConversationLog, InMemoryEngagementRepository, InMemoryPatternRepository, PostgresConversationLog,
    PostgresEngagementRepository, PostgresPatternRepository,
};

/// The three stores the engagement subsystem persists to
#[derive(Clone)]
pub struct Repositories {
    pub engagements: Arc<dyn EngagementRepository>,
    pub patterns: Arc<dyn PatternRepository>,
    pub conversation_log: Arc<dyn ConversationLog>,
}

pub fn create_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> Result<Repositories, EngagementError> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(Repositories {
            engagements: Arc::new(InMemoryEngagementRepository::new()),
            patterns: Arc::new(InMemoryPatternRepository::new()),
            conversation_log: Arc::new(InMemoryConversationLog::new()),
        }),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(Repositories {
            engagements: Arc::new(PostgresEngagementRepository::new(pool.clone())),
            patterns: Arc::new(PostgresPatternRepository::new(pool.clone())),
            conversation_log: Arc::new(PostgresConversationLog::new(pool)),
        }),
        (StorageBackend::PostgreSQL(_), None) => Err(EngagementError::Configuration(
            "postgres storage backend requires a database pool".to_string(),
        )),
    }
}
