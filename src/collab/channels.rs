// SPDX-License-Identifier: MIT
//! Channel membership registry — which users subscribe to which broadcast
//! groups. Membership is runtime-only: entries are created lazily on first
//! join and removed once the member set empties.

use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct ChannelRegistry {
    members: HashMap<String, HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a channel. Returns `false` if the user was already a
    /// member (join is then a no-op for broadcast purposes).
    pub fn join(&mut self, user_id: &str, channel_id: &str) -> bool {
        self.members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Remove a user from a channel. Returns `false` if the user was not a
    /// member. The channel entry is dropped once its member set empties;
    /// message history is kept separately and survives.
    pub fn leave(&mut self, user_id: &str, channel_id: &str) -> bool {
        let Some(set) = self.members.get_mut(channel_id) else {
            return false;
        };
        let removed = set.remove(user_id);
        if set.is_empty() {
            self.members.remove(channel_id);
        }
        removed
    }

    /// Remove a user from every channel they belong to, returning the
    /// affected channel ids. Used when a connection retires.
    pub fn leave_all(&mut self, user_id: &str) -> Vec<String> {
        let channels: Vec<String> = self
            .members
            .iter()
            .filter(|(_, set)| set.contains(user_id))
            .map(|(id, _)| id.clone())
            .collect();
        for channel_id in &channels {
            self.leave(user_id, channel_id);
        }
        channels
    }

    /// Current members of a channel, if any.
    pub fn members(&self, channel_id: &str) -> Option<&HashSet<String>> {
        self.members.get(channel_id)
    }

    pub fn is_member(&self, user_id: &str, channel_id: &str) -> bool {
        self.members
            .get(channel_id)
            .map(|set| set.contains(user_id))
            .unwrap_or(false)
    }

    /// Number of channels with at least one member.
    pub fn active_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_creates_channel_lazily() {
        let mut reg = ChannelRegistry::new();
        assert_eq!(reg.active_count(), 0);
        assert!(reg.join("u1", "c1"));
        assert!(reg.is_member("u1", "c1"));
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn duplicate_join_reports_no_change() {
        let mut reg = ChannelRegistry::new();
        assert!(reg.join("u1", "c1"));
        assert!(!reg.join("u1", "c1"));
    }

    #[test]
    fn leave_of_nonmember_is_noop() {
        let mut reg = ChannelRegistry::new();
        reg.join("u1", "c1");
        assert!(!reg.leave("u2", "c1"));
        assert!(!reg.leave("u1", "other"));
        assert!(reg.is_member("u1", "c1"));
    }

    #[test]
    fn empty_channel_entry_is_removed() {
        let mut reg = ChannelRegistry::new();
        reg.join("u1", "c1");
        reg.join("u2", "c1");
        reg.leave("u1", "c1");
        assert_eq!(reg.active_count(), 1);
        reg.leave("u2", "c1");
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn leave_all_reports_every_membership() {
        let mut reg = ChannelRegistry::new();
        reg.join("u1", "c1");
        reg.join("u1", "c2");
        reg.join("u2", "c2");
        let mut left = reg.leave_all("u1");
        left.sort();
        assert_eq!(left, vec!["c1", "c2"]);
        assert!(!reg.is_member("u1", "c2"));
        assert!(reg.is_member("u2", "c2"));
    }
}
