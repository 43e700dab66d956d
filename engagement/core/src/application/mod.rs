// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod decision_engine;
pub mod pattern_extraction;
pub mod learning_service;
pub mod learning_worker;
pub mod pending_sweeper;
pub mod delivery_scheduler;
pub mod coordinator;
pub mod repository_factory;
pub mod engagement_runtime;

// Re-export services for convenience
pub use coordinator::{EngagementCoordinator, TurnResult};
pub use decision_engine::{DecisionEngine, StandardDecisionEngine};
pub use delivery_scheduler::DeliveryScheduler;
pub use engagement_runtime::{EngagementRuntime, EngagementRuntimeBuilder};
pub use error::EngagementError;
pub use learning_service::{LearningService, LearningSettings, StandardLearningService};
