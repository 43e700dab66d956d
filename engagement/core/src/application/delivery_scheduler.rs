// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delivery Scheduler
//!
//! Turns an engagement decision into a delivery: immediately through the
//! [`ConnectionRegistry`], or after a cancellable delay.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Owns the arena of scheduled deliveries for the process
//!
//! Every armed delivery is an entry in the arena keyed by [`ScheduleId`] and
//! carries its own cancellation token, a child of the scheduler's shutdown
//! token. A firing timer must claim its entry out of the arena before it
//! delivers, so a concurrent cancel either wins outright or finds nothing.
//!
//! Offline users never lose a message: it is persisted as undelivered and
//! reported as [`DeliveryOutcome::Undelivered`]. The scheduler does not retry.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::error::EngagementError;
use crate::application::learning_service::LearningService;
use crate::domain::context::EngagementContext;
use crate::domain::decision::EngagementDecision;
use crate::domain::delivery::{AnalyticsSnapshot, DeliveryOutcome, DeliveryRequest, ScheduleId, UndeliveredReason};
use crate::domain::events::EngagementEvent;
use crate::domain::repository::RepositoryError;
use crate::infrastructure::connection_registry::ConnectionRegistry;
use crate::infrastructure::event_bus::EventBus;

struct ScheduledDelivery {
    request: DeliveryRequest,
    delay_seconds: u64,
    scheduled_at: DateTime<Utc>,
    cancel: CancellationToken,
}

type ScheduleArena = Arc<Mutex<HashMap<ScheduleId, ScheduledDelivery>>>;

pub struct DeliveryScheduler {
    learning_service: Arc<dyn LearningService>,
    registry: Arc<ConnectionRegistry>,
    event_bus: EventBus,
    schedules: ScheduleArena,
    shutdown_token: CancellationToken,
}

impl DeliveryScheduler {
    pub fn new(
        learning_service: Arc<dyn LearningService>,
        registry: Arc<ConnectionRegistry>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            learning_service,
            registry,
            event_bus,
            schedules: Arc::new(Mutex::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Record the decision, then deliver it now or arm a timer.
    ///
    /// Returns `Ok(None)` without side effects when the decision does not engage.
    pub async fn process_decision(
        &self,
        decision: &EngagementDecision,
        context: &EngagementContext,
    ) -> Result<Option<DeliveryOutcome>, EngagementError> {
        let delay_seconds = match decision.delay_seconds() {
            Some(delay) if decision.should_engage => delay,
            _ => return Ok(None),
        };

        let engagement_id = self.learning_service.record_decision(decision, context).await?;
        let request = DeliveryRequest {
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            engagement_id,
            content: decision.message_content.clone().unwrap_or_default(),
        };

        if delay_seconds == 0 {
            let outcome = deliver(&self.registry, &request)
                .await
                .map_err(|e| EngagementError::persistence(&request.session_id, Some(engagement_id), e))?;
            return Ok(Some(outcome));
        }

        let schedule_id = self.arm(request, delay_seconds);
        Ok(Some(DeliveryOutcome::Scheduled {
            engagement_id,
            schedule_id,
            delay_seconds,
        }))
    }

    fn arm(&self, request: DeliveryRequest, delay_seconds: u64) -> ScheduleId {
        let schedule_id = ScheduleId::new();
        let cancel = self.shutdown_token.child_token();
        let engagement_id = request.engagement_id;

        self.schedules.lock().insert(
            schedule_id,
            ScheduledDelivery {
                request,
                delay_seconds,
                scheduled_at: Utc::now(),
                cancel: cancel.clone(),
            },
        );

        let schedules = self.schedules.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay_seconds)) => {}
                _ = cancel.cancelled() => {
                    debug!(schedule_id = %schedule_id, "Scheduled delivery cancelled before firing");
                    return;
                }
            }

            let Some(entry) = schedules.lock().remove(&schedule_id) else {
                return;
            };
            let waited = Utc::now() - entry.scheduled_at;
            debug!(
                schedule_id = %schedule_id,
                delay_seconds = entry.delay_seconds,
                waited_ms = waited.num_milliseconds(),
                "Scheduled delivery firing"
            );

            if let Err(e) = deliver(&registry, &entry.request).await {
                error!(
                    schedule_id = %schedule_id,
                    engagement_id = %entry.request.engagement_id,
                    error = %e,
                    "Scheduled delivery failed"
                );
            }
        });

        info!(schedule_id = %schedule_id, engagement_id = %engagement_id, delay_seconds, "Delivery scheduled");
        counter!("kindred_schedules_total", "action" => "armed").increment(1);
        self.event_bus.publish(EngagementEvent::DeliveryScheduled {
            schedule_id,
            engagement_id,
            delay_seconds,
            timestamp: Utc::now(),
        });
        schedule_id
    }

    /// Cancel a pending delivery. Unknown or already-fired ids are a no-op.
    pub fn cancel_scheduled(&self, schedule_id: ScheduleId) -> bool {
        let Some(entry) = self.schedules.lock().remove(&schedule_id) else {
            debug!(schedule_id = %schedule_id, "Nothing to cancel");
            return false;
        };
        entry.cancel.cancel();

        info!(schedule_id = %schedule_id, engagement_id = %entry.request.engagement_id, "Scheduled delivery cancelled");
        counter!("kindred_schedules_total", "action" => "cancelled").increment(1);
        self.event_bus.publish(EngagementEvent::ScheduleCancelled {
            schedule_id,
            timestamp: Utc::now(),
        });
        true
    }

    /// Live connections and armed schedules, optionally narrowed to one session.
    pub async fn get_analytics(&self, session_id: Option<&str>) -> AnalyticsSnapshot {
        let pending_schedules = {
            let schedules = self.schedules.lock();
            match session_id {
                Some(session_id) => schedules
                    .values()
                    .filter(|s| s.request.session_id == session_id)
                    .count(),
                None => schedules.len(),
            }
        };
        AnalyticsSnapshot {
            active_connections: self.registry.active_connections().await,
            pending_schedules,
        }
    }

    /// Drop every armed delivery without firing it.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        let dropped = {
            let mut schedules = self.schedules.lock();
            let count = schedules.len();
            schedules.clear();
            count
        };
        info!(dropped, "Delivery scheduler shut down");
    }
}

async fn deliver(registry: &ConnectionRegistry, request: &DeliveryRequest) -> Result<DeliveryOutcome, RepositoryError> {
    match registry.deliver(request).await? {
        Some(message_id) => {
            counter!("kindred_deliveries_total", "result" => "delivered").increment(1);
            Ok(DeliveryOutcome::Delivered {
                engagement_id: request.engagement_id,
                message_id,
            })
        }
        None => {
            let pending_message_id = registry.record_undelivered(request).await?;
            warn!(
                user_id = %request.user_id,
                engagement_id = %request.engagement_id,
                "User offline, message kept as pending"
            );
            counter!("kindred_deliveries_total", "result" => "offline").increment(1);
            Ok(DeliveryOutcome::Undelivered {
                engagement_id: request.engagement_id,
                reason: UndeliveredReason::UserOffline,
                pending_message_id,
            })
        }
    }
}
