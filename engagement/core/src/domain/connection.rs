// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection handle contract
//!
//! The transport (WebSocket today) is an external collaborator. The registry
//! only needs to push text, close gracefully, and tell handles apart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a handle is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection for the same user replaced this one.
    Replaced,
    /// The process is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Replaced => "replaced by a newer connection",
            CloseReason::Shutdown => "server shutting down",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// A live, push-capable connection to one user.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Push a UTF-8 text frame.
    async fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    /// Send a graceful close signal. Idempotent.
    async fn close(&self, reason: CloseReason);

    fn is_open(&self) -> bool;
}
