// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application-level error type surfaced to the orchestrating caller.
//!
//! Oracle and validation failures never reach this type; they degrade to
//! fallbacks where they happen. Delivery to an offline user is a result,
//! not an error.

use crate::domain::engagement::{EngagementId, EngagementStateError};
use crate::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("persistence failed for session {session_id} (engagement {engagement}): {source}")]
    Persistence {
        session_id: String,
        engagement: String,
        #[source]
        source: RepositoryError,
    },

    #[error("engagement {0} not found")]
    NotFound(EngagementId),

    #[error(transparent)]
    InvalidState(#[from] EngagementStateError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngagementError {
    pub fn persistence(
        session_id: impl Into<String>,
        engagement_id: Option<EngagementId>,
        source: RepositoryError,
    ) -> Self {
        Self::Persistence {
            session_id: session_id.into(),
            engagement: engagement_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            source,
        }
    }
}
