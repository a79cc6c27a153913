//! Per-connection bookkeeping
//!
//! Tracks, for every live connection, which codes it owns and which
//! channels it participates in, so a disconnect can be unwound without
//! scanning the global registries. Channels opened against an owned code
//! are attached to that code; the receiving side of a channel has no
//! originating code.

use std::collections::{HashMap, HashSet};

use crate::SessionId;

#[derive(Default)]
struct SessionStore {
    /// Owned code -> channels currently bound to it.
    codes: HashMap<String, HashSet<String>>,
    /// Joined channel -> owned code it belongs to, if any.
    channels: HashMap<String, Option<String>>,
}

#[derive(Default)]
pub struct SessionTracker {
    sessions: HashMap<SessionId, SessionStore>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_mut(&mut self, session: SessionId) -> &mut SessionStore {
        self.sessions.entry(session).or_default()
    }

    pub fn add_code(&mut self, session: SessionId, code: &str) {
        self.store_mut(session)
            .codes
            .entry(code.to_string())
            .or_default();
    }

    /// Record a channel membership. When `code` is given the channel is
    /// also attached to that owned code.
    pub fn add_channel(&mut self, session: SessionId, channel_id: &str, code: Option<&str>) {
        let store = self.store_mut(session);
        store
            .channels
            .insert(channel_id.to_string(), code.map(str::to_string));
        if let Some(code) = code {
            store
                .codes
                .entry(code.to_string())
                .or_default()
                .insert(channel_id.to_string());
        }
    }

    pub fn has_code(&self, session: SessionId, code: &str) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|s| s.codes.contains_key(code))
    }

    pub fn codes(&self, session: SessionId) -> Vec<String> {
        self.sessions
            .get(&session)
            .map(|s| s.codes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channels(&self, session: SessionId) -> Vec<String> {
        self.sessions
            .get(&session)
            .map(|s| s.channels.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channels_of_code(&self, session: SessionId, code: &str) -> Vec<String> {
        self.sessions
            .get(&session)
            .and_then(|s| s.codes.get(code))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop an owned code and every channel attached to it.
    pub fn remove_code(&mut self, session: SessionId, code: &str) {
        if let Some(store) = self.sessions.get_mut(&session) {
            if let Some(channels) = store.codes.remove(code) {
                for channel in channels {
                    store.channels.remove(&channel);
                }
            }
        }
    }

    /// Drop a channel membership, detaching it from its code if it had one.
    pub fn remove_channel(&mut self, session: SessionId, channel_id: &str) {
        if let Some(store) = self.sessions.get_mut(&session) {
            if let Some(Some(code)) = store.channels.remove(channel_id) {
                if let Some(set) = store.codes.get_mut(&code) {
                    set.remove(channel_id);
                }
            }
        }
    }

    pub fn remove_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_attach_to_their_code() {
        let mut tracker = SessionTracker::new();
        tracker.add_code(7, "111111");
        tracker.add_channel(7, "ch-a", Some("111111"));
        tracker.add_channel(7, "ch-b", Some("111111"));
        tracker.add_channel(7, "ch-c", None);

        let mut of_code = tracker.channels_of_code(7, "111111");
        of_code.sort();
        assert_eq!(of_code, vec!["ch-a", "ch-b"]);
        assert_eq!(tracker.channels(7).len(), 3);
    }

    #[test]
    fn removing_a_code_drops_its_channels_only() {
        let mut tracker = SessionTracker::new();
        tracker.add_code(7, "111111");
        tracker.add_channel(7, "ch-a", Some("111111"));
        tracker.add_channel(7, "ch-c", None);

        tracker.remove_code(7, "111111");
        assert!(!tracker.has_code(7, "111111"));
        assert_eq!(tracker.channels(7), vec!["ch-c".to_string()]);
    }

    #[test]
    fn removing_a_channel_detaches_it_from_the_code() {
        let mut tracker = SessionTracker::new();
        tracker.add_code(7, "111111");
        tracker.add_channel(7, "ch-a", Some("111111"));

        tracker.remove_channel(7, "ch-a");
        assert!(tracker.channels_of_code(7, "111111").is_empty());
        assert!(tracker.has_code(7, "111111"));
    }

    #[test]
    fn removals_are_idempotent_for_unknown_entries() {
        let mut tracker = SessionTracker::new();
        tracker.remove_channel(7, "ch-a");
        tracker.remove_code(7, "111111");
        tracker.remove_session(7);
        assert!(tracker.is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let mut tracker = SessionTracker::new();
        tracker.add_code(1, "111111");
        tracker.add_channel(2, "ch-a", None);

        assert!(tracker.has_code(1, "111111"));
        assert!(!tracker.has_code(2, "111111"));
        assert!(tracker.channels(1).is_empty());

        tracker.remove_session(1);
        assert!(!tracker.has_code(1, "111111"));
        assert_eq!(tracker.channels(2), vec!["ch-a".to_string()]);
    }
}
