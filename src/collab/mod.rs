// SPDX-License-Identifier: MIT
//! The collaboration hub — presence, channels, history, and fan-out behind
//! a single serialization point.
//!
//! All registry state lives in one `HubState` guarded by one
//! `tokio::sync::Mutex`. Every command handler acquires the lock, runs to
//! completion, and releases it; delivery uses non-blocking per-connection
//! queues, so nothing slow ever happens under the lock. The one external
//! await (task lookup) happens between two lock scopes, and the
//! notification step re-reads presence afterwards instead of trusting a
//! pre-lookup snapshot.

pub mod bridge;
pub mod channels;
pub mod history;
pub mod message;
pub mod presence;
pub mod router;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::channels::ChannelRegistry;
use crate::collab::history::{MessageLog, JOIN_REPLAY_LIMIT};
use crate::collab::message::{Message, MessageKind};
use crate::collab::presence::{ConnectionId, OnlineUser, PresenceRegistry};
use crate::collab::router::BroadcastRouter;
use crate::tasks::TaskDirectory;
use crate::ws::frame::{ClientCommand, ServerEvent};

/// Connection refused: the handshake did not carry a usable identity.
#[derive(Debug, thiserror::Error)]
#[error("handshake rejected: userId and userName are required")]
pub struct HandshakeRejected;

/// Counters surfaced by the health endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub online_users: usize,
    pub active_channels: usize,
    pub channels_with_history: usize,
}

struct HubState {
    presence: PresenceRegistry,
    channels: ChannelRegistry,
    history: MessageLog,
    router: BroadcastRouter,
}

impl HubState {
    /// Connection ids of a channel's current members, optionally excluding
    /// one user. Offline members (impossible today, since retire purges
    /// memberships) simply resolve to nothing.
    fn channel_connections(&self, channel_id: &str, exclude_user: Option<&str>) -> Vec<ConnectionId> {
        let Some(members) = self.channels.members(channel_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|user_id| Some(user_id.as_str()) != exclude_user)
            .filter_map(|user_id| self.presence.connection_of(user_id))
            .collect()
    }
}

/// The encapsulated collaboration service. Constructed once at startup and
/// injected into the transport layer; nothing outside this type mutates the
/// registries.
pub struct CollabHub {
    state: Mutex<HubState>,
    tasks: Arc<dyn TaskDirectory>,
    outbox_capacity: usize,
}

/// Thread-safe shared hub.
pub type SharedHub = Arc<CollabHub>;

impl CollabHub {
    pub fn new(tasks: Arc<dyn TaskDirectory>, outbox_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                presence: PresenceRegistry::new(),
                channels: ChannelRegistry::new(),
                history: MessageLog::new(),
                router: BroadcastRouter::new(),
            }),
            tasks,
            outbox_capacity,
        }
    }

    // ─── Connection lifecycle ────────────────────────────────────────────────

    /// Admit a connection. Returns the assigned connection id and the
    /// receiving end of its outbound queue; the caller owns the socket and
    /// drains the queue into it.
    ///
    /// Sends `connection_established` (with the full roster) to the new
    /// connection and `user_joined` to everyone else. A reconnecting userId
    /// silently supersedes its previous session.
    pub async fn connect(
        &self,
        user_id: &str,
        user_name: &str,
    ) -> Result<(ConnectionId, mpsc::Receiver<String>), HandshakeRejected> {
        if user_id.trim().is_empty() || user_name.trim().is_empty() {
            return Err(HandshakeRejected);
        }

        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);

        let mut state = self.state.lock().await;
        if let Some(superseded) = state.presence.admit(connection_id, user_id, user_name) {
            state.router.unregister(&superseded);
            debug!(user = %user_id, old_conn = %superseded, "session superseded by reconnect");
        }
        state.router.register(connection_id, tx);

        let roster = state.presence.list_online();
        state.router.to_one(
            &connection_id,
            &ServerEvent::ConnectionEstablished {
                session_id: connection_id.to_string(),
                online_users: roster,
            },
        );
        state.router.to_everyone_except(
            &connection_id,
            &ServerEvent::UserJoined {
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
            },
        );
        info!(user = %user_id, conn = %connection_id, "connection admitted");
        Ok((connection_id, rx))
    }

    /// Retire a connection. Idempotent — a connection id that was already
    /// retired (or superseded by a reconnect) is a no-op. Purges channel
    /// memberships (broadcasting `user_left_channel` per affected channel)
    /// before announcing `user_left` to everyone remaining.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let mut state = self.state.lock().await;
        state.router.unregister(&connection_id);
        let Some(session) = state.presence.retire(&connection_id) else {
            return;
        };

        let left_channels = state.channels.leave_all(&session.user_id);
        for channel_id in left_channels {
            let targets = state.channel_connections(&channel_id, None);
            state.router.to_connections(
                targets.iter(),
                &ServerEvent::UserLeftChannel {
                    user_id: session.user_id.clone(),
                    channel_id,
                },
            );
        }

        state.router.to_everyone(&ServerEvent::UserLeft {
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
        });
        info!(user = %session.user_id, conn = %connection_id, "connection retired");
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Dispatch one decoded command on behalf of a connection. Exhaustive
    /// over the command set; nothing here returns an error to the transport.
    pub async fn handle_command(&self, connection_id: ConnectionId, command: ClientCommand) {
        match command {
            ClientCommand::JoinChannel { channel_id } => {
                self.join_channel(connection_id, &channel_id).await;
            }
            ClientCommand::LeaveChannel { channel_id } => {
                self.leave_channel(connection_id, &channel_id).await;
            }
            ClientCommand::SendMessage {
                channel_id,
                content,
                kind,
                task_id,
                project_id,
                metadata,
            } => {
                self.send_message(connection_id, &channel_id, content, kind, task_id, project_id, metadata)
                    .await;
            }
            ClientCommand::TaskComment {
                task_id,
                content,
                project_id,
                metadata,
            } => {
                self.post_task_comment(connection_id, &task_id, content, project_id, metadata)
                    .await;
            }
            ClientCommand::TypingStart { channel_id } => {
                self.typing(connection_id, &channel_id, true).await;
            }
            ClientCommand::TypingStop { channel_id } => {
                self.typing(connection_id, &channel_id, false).await;
            }
            ClientCommand::UserStatus { context } => {
                self.user_status(connection_id, context).await;
            }
        }
    }

    /// Send an `error` event to a single connection (malformed-frame path).
    pub async fn send_error(&self, connection_id: ConnectionId, message: String) {
        let state = self.state.lock().await;
        state
            .router
            .to_one(&connection_id, &ServerEvent::Error { message });
    }

    // ─── Channel commands ────────────────────────────────────────────────────

    async fn join_channel(&self, connection_id: ConnectionId, channel_id: &str) {
        let mut state = self.state.lock().await;
        let Some(session) = state.presence.get(&connection_id).cloned() else {
            return;
        };

        let newly_joined = state.channels.join(&session.user_id, channel_id);

        // History replay goes to the joiner only, oldest first. Re-joining
        // an already-joined channel refreshes the replay without re-announcing.
        let messages = state.history.recent(channel_id, JOIN_REPLAY_LIMIT);
        state.router.to_one(
            &connection_id,
            &ServerEvent::ChannelMessages {
                channel_id: channel_id.to_string(),
                messages,
            },
        );

        if newly_joined {
            let targets = state.channel_connections(channel_id, Some(&session.user_id));
            state.router.to_connections(
                targets.iter(),
                &ServerEvent::UserJoinedChannel {
                    user_id: session.user_id.clone(),
                    channel_id: channel_id.to_string(),
                },
            );
            debug!(user = %session.user_id, channel = %channel_id, "joined channel");
        }
    }

    async fn leave_channel(&self, connection_id: ConnectionId, channel_id: &str) {
        let mut state = self.state.lock().await;
        let Some(session) = state.presence.get(&connection_id).cloned() else {
            return;
        };

        // Leaving a channel you're not in is a no-op: no broadcast, no error.
        if !state.channels.leave(&session.user_id, channel_id) {
            return;
        }

        let targets = state.channel_connections(channel_id, None);
        state.router.to_connections(
            targets.iter(),
            &ServerEvent::UserLeftChannel {
                user_id: session.user_id.clone(),
                channel_id: channel_id.to_string(),
            },
        );
        debug!(user = %session.user_id, channel = %channel_id, "left channel");
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_message(
        &self,
        connection_id: ConnectionId,
        channel_id: &str,
        content: String,
        kind: MessageKind,
        task_id: Option<String>,
        project_id: Option<String>,
        metadata: Option<Value>,
    ) {
        let mut state = self.state.lock().await;
        let Some(session) = state.presence.get(&connection_id).cloned() else {
            return;
        };

        let mut message = Message::new(&session.user_id, &session.user_name, channel_id, content, kind);
        message.task_id = task_id;
        message.project_id = project_id;
        message.metadata = metadata;

        // Stored even when the channel has no members — history replay on a
        // later join still works.
        state.history.append(message.clone());

        let targets = state.channel_connections(channel_id, Some(&session.user_id));
        state
            .router
            .to_connections(targets.iter(), &ServerEvent::NewMessage(message));
    }

    async fn typing(&self, connection_id: ConnectionId, channel_id: &str, started: bool) {
        let state = self.state.lock().await;
        let Some(session) = state.presence.get(&connection_id) else {
            return;
        };

        let event = if started {
            ServerEvent::TypingStart {
                user_id: session.user_id.clone(),
                channel_id: channel_id.to_string(),
            }
        } else {
            ServerEvent::TypingStop {
                user_id: session.user_id.clone(),
                channel_id: channel_id.to_string(),
            }
        };
        let targets = state.channel_connections(channel_id, Some(&session.user_id));
        state.router.to_connections(targets.iter(), &event);
    }

    async fn user_status(&self, connection_id: ConnectionId, context: Option<String>) {
        let mut state = self.state.lock().await;
        let Some(session) = state.presence.get(&connection_id).cloned() else {
            return;
        };

        let Some(refreshed) = state.presence.touch(&session.user_id, context) else {
            return;
        };
        let snapshot = OnlineUser::from(refreshed);
        state
            .router
            .to_everyone_except(&connection_id, &ServerEvent::UserStatusUpdate(snapshot));
    }

    // ─── Task-comment bridge ─────────────────────────────────────────────────

    /// Post a task comment: store + broadcast on the task's derived channel
    /// first, then resolve stakeholders and notify them point-to-point.
    /// Lookup failure skips only the notification step.
    async fn post_task_comment(
        &self,
        connection_id: ConnectionId,
        task_id: &str,
        content: String,
        project_id: Option<String>,
        metadata: Option<Value>,
    ) {
        let channel_id = bridge::task_channel_id(task_id);

        let stored = {
            let mut state = self.state.lock().await;
            let Some(session) = state.presence.get(&connection_id).cloned() else {
                return;
            };

            let mut message = Message::new(
                &session.user_id,
                &session.user_name,
                &channel_id,
                content,
                MessageKind::TaskComment,
            );
            message.task_id = Some(task_id.to_string());
            message.project_id = project_id;
            message.metadata = metadata;

            state.history.append(message.clone());

            // Author gets the confirmation echo; the channel broadcast
            // excludes them.
            state
                .router
                .to_one(&connection_id, &ServerEvent::TaskComment(message.clone()));
            let targets = state.channel_connections(&channel_id, Some(&session.user_id));
            state
                .router
                .to_connections(targets.iter(), &ServerEvent::NewMessage(message.clone()));
            message
        };
        // Lock released — the lookup is the core's only external await.

        let task = match self.tasks.get_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                // The comment already went out; only the direct
                // notifications are skipped.
                warn!(task = %task_id, err = %e, "task lookup failed — skipping stakeholder notifications");
                return;
            }
        };

        // Presence may have changed during the lookup — re-read it rather
        // than notifying from a stale snapshot.
        let state = self.state.lock().await;
        for user_id in bridge::stakeholders(&task, &stored.author_id) {
            if !state.presence.is_online(&user_id) {
                continue;
            }
            if let Some(conn) = state.presence.connection_of(&user_id) {
                state.router.to_one(
                    &conn,
                    &ServerEvent::TaskCommentNotification {
                        task_id: task_id.to_string(),
                        task_title: task.title.clone(),
                        message: stored.clone(),
                    },
                );
            }
        }
    }

    // ─── Read-only queries (dashboard surface) ───────────────────────────────

    /// Everyone currently online. Serialized through the same lock as the
    /// mutation path.
    pub async fn roster(&self) -> Vec<OnlineUser> {
        self.state.lock().await.presence.list_online()
    }

    /// Last `limit` messages of a channel, oldest first.
    pub async fn recent(&self, channel_id: &str, limit: usize) -> Vec<Message> {
        self.state.lock().await.history.recent(channel_id, limit)
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state.lock().await.presence.is_online(user_id)
    }

    pub async fn stats(&self) -> HubStats {
        let state = self.state.lock().await;
        HubStats {
            online_users: state.presence.online_count(),
            active_channels: state.channels.active_count(),
            channels_with_history: state.history.channel_count(),
        }
    }
}
