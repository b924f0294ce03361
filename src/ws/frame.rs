// SPDX-License-Identifier: MIT
//! Wire protocol — inbound command and outbound event envelopes.
//!
//! Both directions use `{ "type": <tag>, "data": <payload> }` JSON text
//! frames. The inbound side is a closed sum type so dispatch is exhaustive;
//! an unrecognized tag is classified separately from a malformed frame
//! because the two have different error behavior (§ error taxonomy: ignore
//! vs. `error` event back to the sender).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collab::message::{Message, MessageKind};
use crate::collab::presence::OnlineUser;

/// Commands a client may issue over an established connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    JoinChannel { channel_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveChannel { channel_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        channel_id: String,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    TaskComment {
        task_id: String,
        content: String,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart { channel_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { channel_id: String },
    #[serde(rename_all = "camelCase")]
    UserStatus {
        #[serde(default)]
        context: Option<String>,
    },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    ConnectionEstablished {
        session_id: String,
        online_users: Vec<OnlineUser>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: String, user_name: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: String, user_name: String },
    #[serde(rename_all = "camelCase")]
    UserJoinedChannel { user_id: String, channel_id: String },
    #[serde(rename_all = "camelCase")]
    UserLeftChannel { user_id: String, channel_id: String },
    /// History replay sent to a joining connection only.
    #[serde(rename_all = "camelCase")]
    ChannelMessages {
        channel_id: String,
        messages: Vec<Message>,
    },
    NewMessage(Message),
    /// Confirmation echo to a task comment's author (the author is excluded
    /// from the channel broadcast).
    TaskComment(Message),
    #[serde(rename_all = "camelCase")]
    TaskCommentNotification {
        task_id: String,
        task_title: String,
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart { user_id: String, channel_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { user_id: String, channel_id: String },
    UserStatusUpdate(OnlineUser),
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

/// Why an inbound frame could not be turned into a command.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Invalid JSON or envelope shape — the sender gets an `error` event.
    #[error("invalid frame: {0}")]
    Malformed(String),
    /// Well-formed envelope with a tag outside the command set — logged and
    /// ignored, no response.
    #[error("unknown command type: {0}")]
    UnknownType(String),
}

const COMMAND_TYPES: [&str; 7] = [
    "join_channel",
    "leave_channel",
    "send_message",
    "task_comment",
    "typing_start",
    "typing_stop",
    "user_status",
];

/// Decode one inbound text frame.
pub fn decode_command(text: &str) -> Result<ClientCommand, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::Malformed("missing \"type\" field".to_string()))?;
    if !COMMAND_TYPES.contains(&tag) {
        return Err(FrameError::UnknownType(tag.to_string()));
    }
    serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
}
