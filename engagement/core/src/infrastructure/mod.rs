// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod event_bus;
pub mod oracle;
pub mod connection_registry;

pub use connection_registry::ConnectionRegistry;
pub use event_bus::EventBus;
