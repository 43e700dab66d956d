// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! WebSocket transport for proactive pushes
//!
//! Each upgraded socket becomes the user's [`ConnectionHandle`]. Frames go
//! through a writer task fed by a bounded channel, so pushes never hold the
//! socket itself. When the client goes away the handle is unregistered, but
//! only while it is still the current one for that user.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::connection::{CloseReason, ConnectionError, ConnectionHandle, ConnectionId};
use crate::presentation::api::AppState;

const OUTBOUND_BUFFER: usize = 32;

pub struct WebSocketHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    open: AtomicBool,
}

impl WebSocketHandle {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionHandle for WebSocketHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    async fn close(&self, reason: CloseReason) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let code = match reason {
            CloseReason::Replaced => close_code::NORMAL,
            CloseReason::Shutdown => close_code::AWAY,
        };
        let frame = CloseFrame {
            code,
            reason: reason.as_str().into(),
        };
        // never wait on a client that stopped reading; the registry may hold its lock
        if let Err(e) = self.outbound.try_send(Message::Close(Some(frame))) {
            debug!(connection_id = %self.id, error = %e, "Close frame not queued");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let handle = Arc::new(WebSocketHandle::new(outbound));
    let connection_id = handle.id();
    let registry = state.runtime.registry.clone();
    registry.register(&user_id, handle.clone()).await;
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connected");

    // Inbound frames carry nothing the engagement runtime consumes
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    handle.mark_closed();
    registry.unregister_if_current(&user_id, connection_id).await;
    writer.abort();
    debug!(user_id = %user_id, connection_id = %connection_id, "WebSocket disconnected");
}
