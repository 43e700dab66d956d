// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`kindred-core`)
//!
//! HTTP and WebSocket surface that translates external requests into
//! application service calls. No business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Turn, decision, schedule, outcome and analytics endpoints |
//! | [`websocket`] | WebSocket (Axum) | Per-user push connection backing the connection registry |

pub mod api;
pub mod websocket;

pub use api::{app, AppState};
