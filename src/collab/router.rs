// SPDX-License-Identifier: MIT
//! Best-effort delivery primitive.
//!
//! Every connection owns a bounded outbound queue; a dedicated writer task
//! drains it into the WebSocket sink. The router only ever `try_send`s — a
//! full or closed queue is treated exactly like a failed send: logged,
//! skipped, never surfaced to the caller. No acknowledgement, no retry.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collab::presence::ConnectionId;
use crate::ws::frame::ServerEvent;

pub struct BroadcastRouter {
    outboxes: HashMap<ConnectionId, mpsc::Sender<String>>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self {
            outboxes: HashMap::new(),
        }
    }

    /// Attach a connection's outbound queue.
    pub fn register(&mut self, connection_id: ConnectionId, tx: mpsc::Sender<String>) {
        self.outboxes.insert(connection_id, tx);
    }

    /// Detach a connection. Dropping the sender ends its writer task.
    pub fn unregister(&mut self, connection_id: &ConnectionId) {
        self.outboxes.remove(connection_id);
    }

    /// Deliver to a single connection. Silently skipped when the target is
    /// not registered.
    pub fn to_one(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        let Some(json) = encode(event) else { return };
        self.push(connection_id, &json);
    }

    /// Deliver to every open connection.
    pub fn to_everyone(&self, event: &ServerEvent) {
        let Some(json) = encode(event) else { return };
        for conn in self.outboxes.keys() {
            self.push(conn, &json);
        }
    }

    /// Deliver to every open connection except one (typically the sender).
    pub fn to_everyone_except(&self, excluded: &ConnectionId, event: &ServerEvent) {
        let Some(json) = encode(event) else { return };
        for conn in self.outboxes.keys() {
            if conn != excluded {
                self.push(conn, &json);
            }
        }
    }

    /// Deliver to an explicit set of connections — the channel-members mode;
    /// the hub resolves membership to connection ids before calling.
    pub fn to_connections<'a, I>(&self, targets: I, event: &ServerEvent)
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let Some(json) = encode(event) else { return };
        for conn in targets {
            self.push(conn, &json);
        }
    }

    fn push(&self, connection_id: &ConnectionId, json: &str) {
        let Some(tx) = self.outboxes.get(connection_id) else {
            // Target already gone — not an error.
            return;
        };
        match tx.try_send(json.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conn = %connection_id, "outbound queue full — dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %connection_id, "outbound queue closed — dropping event");
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }
}

/// Serialize an event once per fan-out. Failures are logged and swallow the
/// delivery — they must never reach the command handler.
fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(err = %e, "failed to serialize outbound event — delivery skipped");
            None
        }
    }
}
