// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Connection Registry
//!
//! Tracks which users hold a live push-capable connection. At most one entry
//! per user. Replacing an entry closes the previous handle while the table is
//! write-locked, so no delivery can observe the stale handle mid-replace.
//!
//! Delivery pushes a [`ProactivePayload`] as UTF-8 text and appends the
//! message to the conversation log. A handle that fails to send is treated as
//! gone: it is unregistered and the delivery reports the user as offline.

use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::connection::{CloseReason, ConnectionHandle, ConnectionId};
use crate::domain::delivery::{ConversationMessage, DeliveryRequest, MessageId, ProactivePayload};
use crate::domain::events::EngagementEvent;
use crate::domain::repository::{ConversationLog, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<dyn ConnectionHandle>>>,
    conversation_log: Arc<dyn ConversationLog>,
    event_bus: EventBus,
}

impl ConnectionRegistry {
    pub fn new(conversation_log: Arc<dyn ConversationLog>, event_bus: EventBus) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            conversation_log,
            event_bus,
        }
    }

    /// Install `handle` as the user's connection, closing any prior one first.
    pub async fn register(&self, user_id: &str, handle: Arc<dyn ConnectionHandle>) {
        let new_id = handle.id();
        let mut connections = self.connections.write().await;

        if let Some(previous) = connections.remove(user_id) {
            let old_id = previous.id();
            previous.close(CloseReason::Replaced).await;
            info!(user_id = %user_id, old_connection = %old_id, new_connection = %new_id, "Connection replaced");
            self.event_bus.publish(EngagementEvent::ConnectionReplaced {
                user_id: user_id.to_string(),
                old_connection_id: old_id,
                new_connection_id: new_id,
                timestamp: Utc::now(),
            });
        }

        connections.insert(user_id.to_string(), handle);
        drop(connections);

        debug!(user_id = %user_id, connection_id = %new_id, "Connection registered");
        self.event_bus.publish(EngagementEvent::ConnectionRegistered {
            user_id: user_id.to_string(),
            connection_id: new_id,
            timestamp: Utc::now(),
        });
    }

    /// Remove the user's entry. Returns whether one existed.
    pub async fn unregister(&self, user_id: &str) -> bool {
        let removed = self.connections.write().await.remove(user_id);
        match removed {
            Some(handle) => {
                self.publish_closed(user_id, handle.id());
                true
            }
            None => false,
        }
    }

    /// Remove the user's entry only while it still refers to `connection_id`.
    /// A closing socket must not evict the connection that replaced it.
    pub async fn unregister_if_current(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let is_current = connections
            .get(user_id)
            .map(|h| h.id() == connection_id)
            .unwrap_or(false);
        if !is_current {
            return false;
        }
        connections.remove(user_id);
        drop(connections);

        self.publish_closed(user_id, connection_id);
        true
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(user_id)
            .map(|h| h.is_open())
            .unwrap_or(false)
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Push a proactive message. `Ok(None)` means the user is offline.
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<Option<MessageId>, RepositoryError> {
        let handle = self.connections.read().await.get(&request.user_id).cloned();
        let Some(handle) = handle else {
            return Ok(None);
        };

        if !handle.is_open() {
            self.unregister_if_current(&request.user_id, handle.id()).await;
            return Ok(None);
        }

        let payload = ProactivePayload::new(request.content.clone(), request.engagement_id);
        let text = payload
            .to_text()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        if let Err(e) = handle.send_text(text).await {
            warn!(
                user_id = %request.user_id,
                engagement_id = %request.engagement_id,
                error = %e,
                "Push failed, dropping connection"
            );
            counter!("kindred_deliveries_total", "result" => "failed").increment(1);
            self.unregister_if_current(&request.user_id, handle.id()).await;
            return Ok(None);
        }

        let message = ConversationMessage::proactive(request, payload.id, true);
        let message_id = self.conversation_log.append(&message).await?;

        self.event_bus.publish(EngagementEvent::MessageDelivered {
            engagement_id: request.engagement_id,
            message_id,
            user_id: request.user_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(Some(message_id))
    }

    /// Persist a message the user could not receive, for later display.
    pub async fn record_undelivered(&self, request: &DeliveryRequest) -> Result<MessageId, RepositoryError> {
        let message = ConversationMessage::proactive(request, MessageId::new(), false);
        let message_id = self.conversation_log.append(&message).await?;

        self.event_bus.publish(EngagementEvent::MessageQueuedOffline {
            engagement_id: request.engagement_id,
            message_id,
            user_id: request.user_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(message_id)
    }

    /// Close every open handle with a graceful close signal, then clear the table.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        for (_, handle) in connections.iter() {
            handle.close(CloseReason::Shutdown).await;
        }
        connections.clear();
        info!(closed = count, "Connection registry shut down");
    }

    fn publish_closed(&self, user_id: &str, connection_id: ConnectionId) {
        debug!(user_id = %user_id, connection_id = %connection_id, "Connection unregistered");
        self.event_bus.publish(EngagementEvent::ConnectionClosed {
            user_id: user_id.to_string(),
            connection_id,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::connection::ConnectionError;
    use crate::domain::engagement::EngagementId;
    use crate::infrastructure::repositories::InMemoryConversationLog;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Handle that records what happened to it in a shared journal.
    pub(crate) struct RecordingHandle {
        pub(crate) id: ConnectionId,
        pub(crate) label: &'static str,
        pub(crate) journal: Arc<Mutex<Vec<String>>>,
        pub(crate) open: AtomicBool,
        pub(crate) fail_sends: bool,
        pub(crate) close_delay: Option<Duration>,
    }

    impl RecordingHandle {
        pub(crate) fn new(label: &'static str, journal: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id: ConnectionId::new(),
                label,
                journal,
                open: AtomicBool::new(true),
                fail_sends: false,
                close_delay: None,
            }
        }
    }

    #[async_trait]
    impl ConnectionHandle for RecordingHandle {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
            if self.fail_sends || !self.open.load(Ordering::SeqCst) {
                return Err(ConnectionError::Closed);
            }
            self.journal.lock().push(format!("sent:{}:{}", self.label, text));
            Ok(())
        }

        async fn close(&self, reason: CloseReason) {
            if let Some(delay) = self.close_delay {
                tokio::time::sleep(delay).await;
            }
            self.open.store(false, Ordering::SeqCst);
            self.journal.lock().push(format!("closed:{}:{:?}", self.label, reason));
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn request(user: &str) -> DeliveryRequest {
        DeliveryRequest {
            session_id: "s1".into(),
            user_id: user.into(),
            engagement_id: EngagementId::new(),
            content: "Thinking of you".into(),
        }
    }

    fn registry() -> (Arc<ConnectionRegistry>, InMemoryConversationLog) {
        let log = InMemoryConversationLog::new();
        let registry = ConnectionRegistry::new(Arc::new(log.clone()), EventBus::new(16));
        (Arc::new(registry), log)
    }

    #[tokio::test]
    async fn test_offline_user_gets_nothing() {
        let (registry, log) = registry();
        assert!(!registry.is_online("u1").await);
        assert_eq!(registry.deliver(&request("u1")).await.unwrap(), None);
        assert!(log.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_pushes_payload_and_logs_message() {
        let (registry, log) = registry();
        let journal = Arc::new(Mutex::new(Vec::new()));
        registry
            .register("u1", Arc::new(RecordingHandle::new("a", journal.clone())))
            .await;

        let req = request("u1");
        let message_id = registry.deliver(&req).await.unwrap().unwrap();

        let entries = journal.lock().clone();
        assert_eq!(entries.len(), 1);
        let text = entries[0].strip_prefix("sent:a:").unwrap();
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["type"], "proactive");
        assert_eq!(payload["content"], "Thinking of you");
        assert_eq!(payload["id"], serde_json::json!(message_id));
        assert_eq!(payload["engagementId"], serde_json::json!(req.engagement_id));
        assert!(payload["timestamp"].is_string());

        let logged = log.all().await;
        assert_eq!(logged.len(), 1);
        assert!(logged[0].proactive && logged[0].delivered);
        assert_eq!(logged[0].id, message_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_closes_old_handle_before_new_delivers() {
        let (registry, _log) = registry();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let mut old = RecordingHandle::new("old", journal.clone());
        old.close_delay = Some(Duration::from_secs(1));
        registry.register("u1", Arc::new(old)).await;

        let replacing = {
            let registry = registry.clone();
            let new = Arc::new(RecordingHandle::new("new", journal.clone()));
            tokio::spawn(async move { registry.register("u1", new).await })
        };
        // Let the replacement take the write lock and start closing
        tokio::task::yield_now().await;

        let delivered = registry.deliver(&request("u1")).await.unwrap();
        replacing.await.unwrap();

        assert!(delivered.is_some());
        let entries = journal.lock().clone();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], "closed:old:Replaced");
        assert!(entries[1].starts_with("sent:new:"));
        assert_eq!(registry.active_connections().await, 1);
    }

    #[tokio::test]
    async fn test_failed_send_unregisters_and_reports_offline() {
        let (registry, log) = registry();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut broken = RecordingHandle::new("broken", journal);
        broken.fail_sends = true;
        registry.register("u1", Arc::new(broken)).await;

        assert_eq!(registry.deliver(&request("u1")).await.unwrap(), None);
        assert!(!registry.is_online("u1").await);
        assert!(log.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_close_does_not_evict_replacement() {
        let (registry, _log) = registry();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let first = RecordingHandle::new("first", journal.clone());
        let first_id = first.id;
        registry.register("u1", Arc::new(first)).await;
        registry
            .register("u1", Arc::new(RecordingHandle::new("second", journal)))
            .await;

        assert!(!registry.unregister_if_current("u1", first_id).await);
        assert!(registry.is_online("u1").await);
        assert!(registry.unregister("u1").await);
        assert!(!registry.unregister("u1").await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (registry, _log) = registry();
        let journal = Arc::new(Mutex::new(Vec::new()));
        registry
            .register("u1", Arc::new(RecordingHandle::new("a", journal.clone())))
            .await;
        registry
            .register("u2", Arc::new(RecordingHandle::new("b", journal.clone())))
            .await;

        registry.shutdown().await;

        assert_eq!(registry.active_connections().await, 0);
        let entries = journal.lock().clone();
        assert_eq!(entries.iter().filter(|e| e.ends_with(":Shutdown")).count(), 2);
    }

    #[tokio::test]
    async fn test_undelivered_message_is_persisted_as_pending() {
        let (registry, log) = registry();
        let req = request("u1");
        let id = registry.record_undelivered(&req).await.unwrap();

        let pending = log.list_undelivered("u1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].engagement_id, Some(req.engagement_id));
    }
}
