// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Conversation Log
//!
//! Append-only `ConversationLog` backed by the `conversation_messages` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::delivery::{ConversationMessage, MessageId, MessageSender};
use crate::domain::engagement::EngagementId;
use crate::domain::repository::{ConversationLog, RepositoryError};

pub struct PostgresConversationLog {
    pool: PgPool,
}

impl PostgresConversationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationLog for PostgresConversationLog {
    async fn append(&self, message: &ConversationMessage) -> Result<MessageId, RepositoryError> {
        let sender = match message.sender {
            MessageSender::User => "user",
            MessageSender::Assistant => "assistant",
        };

        sqlx::query(
            r#"
            INSERT INTO conversation_messages (
                id, session_id, user_id, sender, content, proactive, delivered,
                engagement_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id.0)
        .bind(&message.session_id)
        .bind(&message.user_id)
        .bind(sender)
        .bind(&message.content)
        .bind(message.proactive)
        .bind(message.delivered)
        .bind(message.engagement_id.map(|id| id.0))
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to append message: {}", e)))?;

        Ok(message.id)
    }

    async fn list_undelivered(&self, user_id: &str) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, user_id, sender, content, proactive, delivered,
                   engagement_id, created_at
            FROM conversation_messages
            WHERE user_id = $1 AND proactive AND NOT delivered
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let messages = rows
            .iter()
            .map(|row| {
                let sender: String = row.get("sender");
                let engagement_id: Option<uuid::Uuid> = row.get("engagement_id");
                ConversationMessage {
                    id: MessageId(row.get("id")),
                    session_id: row.get("session_id"),
                    user_id: row.get("user_id"),
                    sender: if sender == "user" {
                        MessageSender::User
                    } else {
                        MessageSender::Assistant
                    },
                    content: row.get("content"),
                    proactive: row.get("proactive"),
                    delivered: row.get("delivered"),
                    engagement_id: engagement_id.map(EngagementId),
                    created_at: row.get("created_at"),
                }
            })
            .collect();

        Ok(messages)
    }
}
