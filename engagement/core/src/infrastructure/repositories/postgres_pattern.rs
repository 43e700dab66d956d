// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Pattern Repository
//!
//! Insert-only `PatternRepository` backed by the `learned_patterns` table.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::pattern::{LearnedPattern, PatternId, PatternType};
use crate::domain::repository::{PatternRepository, RepositoryError};

pub struct PostgresPatternRepository {
    pool: PgPool,
}

impl PostgresPatternRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pattern(row: &PgRow) -> Result<LearnedPattern, RepositoryError> {
        let pattern_type: String = row.get("pattern_type");
        let pattern_type = PatternType::parse(&pattern_type).ok_or_else(|| {
            RepositoryError::Serialization(format!("Unknown pattern type: {}", pattern_type))
        })?;
        let sample_size: i32 = row.get("sample_size");

        Ok(LearnedPattern {
            id: PatternId(row.get("id")),
            personality_id: row.get("personality_id"),
            pattern_type,
            pattern_context: into_map(row.get("pattern_context")),
            pattern_data: into_map(row.get("pattern_data")),
            confidence_score: row.get("confidence_score"),
            sample_size: sample_size.max(0) as u32,
            created_at: row.get("created_at"),
        })
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl PatternRepository for PostgresPatternRepository {
    async fn insert(&self, pattern: &LearnedPattern) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO learned_patterns (
                id, personality_id, pattern_type, pattern_context, pattern_data,
                confidence_score, sample_size, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(pattern.id.0)
        .bind(&pattern.personality_id)
        .bind(pattern.pattern_type.as_str())
        .bind(Value::Object(pattern.pattern_context.clone()))
        .bind(Value::Object(pattern.pattern_data.clone()))
        .bind(pattern.confidence_score)
        .bind(pattern.sample_size as i32)
        .bind(pattern.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert pattern: {}", e)))?;

        Ok(())
    }

    async fn list_applicable(
        &self,
        personality_id: &str,
        pattern_type: Option<PatternType>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<LearnedPattern>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, personality_id, pattern_type, pattern_context, pattern_data,
                   confidence_score, sample_size, created_at
            FROM learned_patterns
            WHERE personality_id = $1
              AND ($2::TEXT IS NULL OR pattern_type = $2)
              AND confidence_score >= $3
            ORDER BY confidence_score DESC, created_at DESC
            LIMIT $4
            "#,
        )
        .bind(personality_id)
        .bind(pattern_type.map(PatternType::as_str))
        .bind(threshold)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_pattern).collect()
    }
}
