//! Channel routing table
//!
//! A channel pairs the two ends of one transfer under the id the receiver
//! picked. The table only answers one question the router cares about:
//! given a channel and one member, who is the other member.

use std::collections::HashMap;

use crate::error::{RelayError, Result};
use crate::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPair {
    /// The side that owns the share code and sends the files.
    pub sender: SessionId,
    /// The side that redeemed the code.
    pub receiver: SessionId,
}

#[derive(Default)]
pub struct ChannelRouter {
    channels: HashMap<String, ChannelPair>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, channel_id: &str, sender: SessionId, receiver: SessionId) -> Result<()> {
        if self.channels.contains_key(channel_id) {
            return Err(RelayError::ChannelExists(channel_id.to_string()));
        }
        self.channels
            .insert(channel_id.to_string(), ChannelPair { sender, receiver });
        Ok(())
    }

    /// The other member of `channel_id`, as seen from `requester`.
    pub fn peer_of(&self, channel_id: &str, requester: SessionId) -> Result<SessionId> {
        let pair = self
            .channels
            .get(channel_id)
            .ok_or_else(|| RelayError::ChannelNotFound(channel_id.to_string()))?;
        if requester == pair.sender {
            Ok(pair.receiver)
        } else if requester == pair.receiver {
            Ok(pair.sender)
        } else {
            Err(RelayError::NotChannelMember(channel_id.to_string()))
        }
    }

    pub fn unbind(&mut self, channel_id: &str) -> Result<ChannelPair> {
        self.channels
            .remove(channel_id)
            .ok_or_else(|| RelayError::ChannelNotFound(channel_id.to_string()))
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_resolution_works_from_both_sides() {
        let mut router = ChannelRouter::new();
        router.bind("ch-1", 1, 2).unwrap();
        assert_eq!(router.peer_of("ch-1", 1).unwrap(), 2);
        assert_eq!(router.peer_of("ch-1", 2).unwrap(), 1);
    }

    #[test]
    fn duplicate_bind_is_rejected_and_keeps_the_first_pair() {
        let mut router = ChannelRouter::new();
        router.bind("ch-1", 1, 2).unwrap();
        assert_eq!(
            router.bind("ch-1", 3, 4),
            Err(RelayError::ChannelExists("ch-1".to_string()))
        );
        assert_eq!(router.peer_of("ch-1", 1).unwrap(), 2);
    }

    #[test]
    fn outsiders_cannot_resolve_a_peer() {
        let mut router = ChannelRouter::new();
        router.bind("ch-1", 1, 2).unwrap();
        assert_eq!(
            router.peer_of("ch-1", 3),
            Err(RelayError::NotChannelMember("ch-1".to_string()))
        );
    }

    #[test]
    fn unknown_channel_is_not_found() {
        let mut router = ChannelRouter::new();
        assert_eq!(
            router.peer_of("nope", 1),
            Err(RelayError::ChannelNotFound("nope".to_string()))
        );
        assert_eq!(
            router.unbind("nope"),
            Err(RelayError::ChannelNotFound("nope".to_string()))
        );
    }

    #[test]
    fn unbind_frees_the_id_for_reuse() {
        let mut router = ChannelRouter::new();
        router.bind("ch-1", 1, 2).unwrap();
        let pair = router.unbind("ch-1").unwrap();
        assert_eq!(pair, ChannelPair { sender: 1, receiver: 2 });
        assert!(router.is_empty());
        router.bind("ch-1", 5, 6).unwrap();
    }
}
