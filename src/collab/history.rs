// SPDX-License-Identifier: MIT
//! Bounded per-channel message history.
//!
//! Each channel keeps an append-only, capacity-bounded `VecDeque` of
//! messages. Insertion past the cap evicts the oldest entries (FIFO), so
//! the remainder stays in chronological order. Histories outlive channel
//! membership — a channel whose last member left keeps its log so a
//! rejoining user still gets replay.

use std::collections::HashMap;

use crate::collab::message::Message;

/// Hard cap on messages retained per channel.
pub const CHANNEL_HISTORY_CAP: usize = 1000;

/// How many trailing messages a joining user receives.
pub const JOIN_REPLAY_LIMIT: usize = 50;

#[derive(Default)]
pub struct MessageLog {
    logs: HashMap<String, std::collections::VecDeque<Message>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its channel's history, evicting the oldest entry
    /// when the cap is reached. The channel's log is created on first use.
    pub fn append(&mut self, message: Message) {
        let log = self.logs.entry(message.channel_id.clone()).or_default();
        if log.len() >= CHANNEL_HISTORY_CAP {
            log.pop_front();
        }
        log.push_back(message);
    }

    /// The last `limit` messages of a channel, oldest first. Empty for an
    /// unknown channel.
    pub fn recent(&self, channel_id: &str, limit: usize) -> Vec<Message> {
        match self.logs.get(channel_id) {
            Some(log) => {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of messages currently retained for a channel.
    pub fn len(&self, channel_id: &str) -> usize {
        self.logs.get(channel_id).map(|l| l.len()).unwrap_or(0)
    }

    /// Number of channels that have history.
    pub fn channel_count(&self) -> usize {
        self.logs.len()
    }
}
