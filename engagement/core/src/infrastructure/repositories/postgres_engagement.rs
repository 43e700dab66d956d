// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Engagement Repository
//!
//! `EngagementRepository` backed by the `engagement_records` table. The
//! psychological snapshot is stored as JSONB; enums are stored as their
//! snake_case names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::context::{PsychologicalState, TriggerType};
use crate::domain::engagement::{EngagementId, EngagementOutcome, EngagementRecord, Sentiment};
use crate::domain::repository::{EngagementRepository, RepositoryError};

const SELECT_COLUMNS: &str = r#"
    id, session_id, user_id, personality_id, trigger_type, psychological_snapshot,
    decision_reasoning, proactive_content, scheduled_delay_seconds, created_at,
    responded_at, user_response_text, response_time_seconds, sentiment,
    success_score, expired_at, learning_extracted
"#;

pub struct PostgresEngagementRepository {
    pool: PgPool,
}

impl PostgresEngagementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<EngagementRecord, RepositoryError> {
        let snapshot: Option<serde_json::Value> = row.get("psychological_snapshot");
        let psychological_snapshot = snapshot
            .map(serde_json::from_value::<PsychologicalState>)
            .transpose()
            .map_err(|e| RepositoryError::Serialization(format!("Failed to deserialize snapshot: {}", e)))?;

        let trigger_type: String = row.get("trigger_type");
        let sentiment: Option<String> = row.get("sentiment");
        let delay: i64 = row.get("scheduled_delay_seconds");

        Ok(EngagementRecord {
            id: EngagementId(row.get("id")),
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            personality_id: row.get("personality_id"),
            trigger_type: TriggerType::parse(&trigger_type),
            psychological_snapshot,
            decision_reasoning: row.get("decision_reasoning"),
            proactive_content: row.get("proactive_content"),
            scheduled_delay_seconds: delay.max(0) as u64,
            created_at: row.get("created_at"),
            responded_at: row.get("responded_at"),
            user_response_text: row.get("user_response_text"),
            response_time_seconds: row.get("response_time_seconds"),
            sentiment: sentiment.as_deref().and_then(Sentiment::parse),
            success_score: row.get("success_score"),
            expired_at: row.get("expired_at"),
            learning_extracted: row.get("learning_extracted"),
        })
    }

    fn rows_to_records(rows: &[PgRow]) -> Result<Vec<EngagementRecord>, RepositoryError> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl EngagementRepository for PostgresEngagementRepository {
    async fn insert(&self, record: &EngagementRecord) -> Result<(), RepositoryError> {
        let snapshot = record
            .psychological_snapshot
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO engagement_records (
                id, session_id, user_id, personality_id, trigger_type,
                psychological_snapshot, decision_reasoning, proactive_content,
                scheduled_delay_seconds, created_at, learning_extracted
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.0)
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(&record.personality_id)
        .bind(record.trigger_type.as_str())
        .bind(snapshot)
        .bind(&record.decision_reasoning)
        .bind(&record.proactive_content)
        .bind(record.scheduled_delay_seconds as i64)
        .bind(record.created_at)
        .bind(record.learning_extracted)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert engagement record: {}", e)))?;

        Ok(())
    }

    async fn update_outcome(
        &self,
        id: EngagementId,
        outcome: &EngagementOutcome,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE engagement_records
            SET responded_at = $2,
                user_response_text = $3,
                response_time_seconds = $4,
                sentiment = $5,
                success_score = $6
            WHERE id = $1 AND success_score IS NULL AND expired_at IS NULL
            "#,
        )
        .bind(id.0)
        .bind(outcome.responded_at)
        .bind(&outcome.user_response_text)
        .bind(outcome.response_time_seconds)
        .bind(outcome.sentiment.as_str())
        .bind(outcome.success_score)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update outcome: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("pending engagement {}", id)));
        }
        Ok(())
    }

    async fn mark_expired(&self, id: EngagementId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE engagement_records
            SET expired_at = $2, success_score = 0.0
            WHERE id = $1 AND success_score IS NULL AND expired_at IS NULL
            "#,
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to expire engagement: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("pending engagement {}", id)));
        }
        Ok(())
    }

    async fn mark_extracted(&self, ids: &[EngagementId]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();

        sqlx::query("UPDATE engagement_records SET learning_extracted = TRUE WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to mark extracted: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: EngagementId) -> Result<Option<EngagementRecord>, RepositoryError> {
        let query = format!("SELECT {} FROM engagement_records WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM engagement_records ORDER BY created_at DESC LIMIT $1",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Self::rows_to_records(&rows)
    }

    async fn list_by_persona(
        &self,
        personality_id: &str,
        limit: usize,
    ) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM engagement_records WHERE personality_id = $1 ORDER BY created_at DESC LIMIT $2",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(personality_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Self::rows_to_records(&rows)
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementRecord>, RepositoryError> {
        let query = format!(
            r#"
            SELECT {} FROM engagement_records
            WHERE success_score IS NULL AND expired_at IS NULL AND created_at < $1
            ORDER BY created_at ASC
            "#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Self::rows_to_records(&rows)
    }
}
