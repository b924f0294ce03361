// SPDX-License-Identifier: MIT
//! Message model — immutable once appended to a channel's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What a message carries. Clients render each kind differently; the server
/// treats them identically except that `TaskComment` is only produced by the
/// task-comment bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    File,
    Image,
    TaskComment,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

/// A single chat message. Never mutated or reordered after it is appended
/// to a channel's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-generated id (UUID v4).
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    /// Set for task comments and for messages a client pins to a task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Free-form client payload (mentions, attachment refs). Opaque to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Build a new message with a fresh id and the current timestamp.
    pub fn new(
        author_id: &str,
        author_name: &str,
        channel_id: &str,
        content: String,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            content,
            kind,
            channel_id: channel_id.to_string(),
            created_at: Utc::now(),
            task_id: None,
            project_id: None,
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(MessageKind::TaskComment).unwrap();
        assert_eq!(v, serde_json::json!("task_comment"));
    }

    #[test]
    fn optional_fields_omitted_on_wire() {
        let m = Message::new("u1", "Alice", "proj_1", "hi".into(), MessageKind::Text);
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("taskId").is_none());
        assert!(v.get("metadata").is_none());
        assert_eq!(v["authorId"], "u1");
        assert_eq!(v["channelId"], "proj_1");
    }
}
