// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure engagement types, invariants and the contracts adapters implement.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Decisions, engagement records, patterns, delivery and configuration

pub mod config;
pub mod connection;
pub mod context;
pub mod decision;
pub mod delivery;
pub mod engagement;
pub mod events;
pub mod intent;
pub mod oracle;
pub mod pattern;
pub mod repository;
pub mod sentiment;
