// SPDX-License-Identifier: MIT
//! Presence registry — the live set of connected users.
//!
//! One live session per userId: a reconnect overwrites the previous entry,
//! and the superseded connection's retire becomes a no-op (sessions are
//! removed by connection id, which no longer resolves). Channel memberships
//! are keyed by userId and therefore survive a reconnect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A live connection's session entry. Created on successful handshake,
/// destroyed on disconnect (or when superseded by a reconnect).
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub user_name: String,
    pub last_seen_at: DateTime<Utc>,
    /// Client-reported focus, e.g. the project currently open.
    pub context: Option<String>,
}

/// Roster entry sent to clients in `connection_established` and
/// `user_status_update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub user_name: String,
    pub last_seen_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl From<&Session> for OnlineUser {
    fn from(s: &Session) -> Self {
        Self {
            user_id: s.user_id.clone(),
            user_name: s.user_name.clone(),
            last_seen_at: s.last_seen_at,
            context: s.context.clone(),
        }
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    by_conn: HashMap<ConnectionId, Session>,
    by_user: HashMap<String, ConnectionId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session for a freshly admitted connection. If the user is
    /// already online the prior session is evicted and its connection id is
    /// returned so the caller can tear down that connection's outbound queue.
    pub fn admit(
        &mut self,
        connection_id: ConnectionId,
        user_id: &str,
        user_name: &str,
    ) -> Option<ConnectionId> {
        let evicted = self.by_user.insert(user_id.to_string(), connection_id);
        if let Some(old) = evicted {
            self.by_conn.remove(&old);
        }
        self.by_conn.insert(
            connection_id,
            Session {
                connection_id,
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
                last_seen_at: Utc::now(),
                context: None,
            },
        );
        evicted
    }

    /// Remove the session for a connection, returning it. Idempotent:
    /// unknown (or superseded) connection ids yield `None`. The userId
    /// index is only cleared when it still points at this connection.
    pub fn retire(&mut self, connection_id: &ConnectionId) -> Option<Session> {
        let session = self.by_conn.remove(connection_id)?;
        if self.by_user.get(&session.user_id) == Some(connection_id) {
            self.by_user.remove(&session.user_id);
        }
        Some(session)
    }

    /// Update lastSeenAt and context for a user. Returns the refreshed
    /// session, or `None` if the user is not online.
    pub fn touch(&mut self, user_id: &str, context: Option<String>) -> Option<&Session> {
        let conn = self.by_user.get(user_id)?;
        let session = self.by_conn.get_mut(conn)?;
        session.last_seen_at = Utc::now();
        session.context = context;
        Some(session)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Session> {
        self.by_conn.get(connection_id)
    }

    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.by_user.get(user_id).copied()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Snapshot of everyone currently online.
    pub fn list_online(&self) -> Vec<OnlineUser> {
        self.by_conn.values().map(OnlineUser::from).collect()
    }

    pub fn online_count(&self) -> usize {
        self.by_conn.len()
    }
}
