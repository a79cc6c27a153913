//! Message dispatch
//!
//! One router instance owns all three registries and applies every state
//! transition. It is transport-free: `handle_message` and
//! `handle_disconnect` return the frames to deliver and the websocket
//! layer does the actual sending, which keeps the whole dispatch table
//! testable without sockets.

use airlift_proto::{Envelope, action};

use crate::channels::ChannelRouter;
use crate::codes::CodeRegistry;
use crate::error::{RelayError, Result};
use crate::sessions::SessionTracker;
use crate::SessionId;

/// Frames to deliver after a dispatch, paired with their destination.
pub type Outbound = Vec<(SessionId, Envelope)>;

pub struct MessageRouter {
    codes: CodeRegistry,
    channels: ChannelRouter,
    sessions: SessionTracker,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::with_codes(CodeRegistry::new())
    }

    /// Router over a custom code registry, used by tests to shrink the
    /// code space.
    pub fn with_codes(codes: CodeRegistry) -> Self {
        Self {
            codes,
            channels: ChannelRouter::new(),
            sessions: SessionTracker::new(),
        }
    }

    /// Apply one inbound frame from `from`.
    ///
    /// Domain errors never escape: the failed message is echoed back to
    /// the requester with `error` set. Structurally incomplete frames are
    /// dropped without a reply.
    pub fn handle_message(&mut self, from: SessionId, env: Envelope) -> Outbound {
        match self.dispatch(from, &env) {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(session = from, action = %env.action, error = %e, "request failed");
                vec![(from, env.error_echo(e))]
            }
        }
    }

    fn dispatch(&mut self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        match env.action.as_str() {
            action::ALLOCATE => self.allocate(from, env),
            action::DELETE => self.delete(from, env),
            action::DOWNLOAD => self.download(from, env),
            action::CANCEL | action::COMPLETE => self.teardown(from, env),
            _ => self.forward(from, env),
        }
    }

    fn allocate(&mut self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        let code = self.codes.allocate(from)?;
        self.sessions.add_code(from, &code);
        tracing::info!(session = from, code, "code allocated");

        let mut reply = env.clone();
        reply.code = Some(code);
        Ok(vec![(from, reply)])
    }

    fn delete(&mut self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        let code = env.code.clone().unwrap_or_default();
        if !self.sessions.has_code(from, &code) {
            return Err(RelayError::NotCodeOwner(code));
        }

        // Cancel every transfer still running against the code before the
        // code itself goes away.
        let mut out = Vec::new();
        for channel_id in self.sessions.channels_of_code(from, &code) {
            let peer = self.channels.peer_of(&channel_id, from)?;
            self.channels.unbind(&channel_id)?;
            self.sessions.remove_channel(peer, &channel_id);
            out.push((peer, Envelope::cancel(&channel_id)));
        }

        self.sessions.remove_code(from, &code);
        self.codes.release(&code)?;
        tracing::info!(session = from, code, "code deleted");

        out.push((from, env.clone()));
        Ok(out)
    }

    fn download(&mut self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        let Some(channel_id) = env.channel_id.clone() else {
            return Ok(Vec::new());
        };
        let code = env.code.clone().unwrap_or_default();
        let owner = self.codes.lookup(&code)?;
        if owner == from {
            return Err(RelayError::SelfDownload(code));
        }

        self.channels.bind(&channel_id, owner, from)?;
        self.sessions.add_channel(owner, &channel_id, Some(&code));
        self.sessions.add_channel(from, &channel_id, None);
        tracing::info!(session = from, code, channel = %channel_id, "download started");

        // The requester gets its reply, the owner gets told to dial in.
        Ok(vec![
            (from, env.clone()),
            (owner, Envelope::connect(&code, &channel_id)),
        ])
    }

    /// `cancel` and `complete` both end the channel and pass the frame on.
    fn teardown(&mut self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        let Some(channel_id) = env.channel_id.as_deref() else {
            return Ok(Vec::new());
        };
        let peer = self.channels.peer_of(channel_id, from)?;
        self.channels.unbind(channel_id)?;
        self.sessions.remove_channel(from, channel_id);
        self.sessions.remove_channel(peer, channel_id);
        tracing::debug!(session = from, channel = %channel_id, action = %env.action, "channel closed");

        Ok(vec![(peer, env.clone())])
    }

    /// Anything else is signaling traffic relayed verbatim to the peer.
    fn forward(&self, from: SessionId, env: &Envelope) -> Result<Outbound> {
        let Some(channel_id) = env.channel_id.as_deref() else {
            return Ok(Vec::new());
        };
        let peer = self.channels.peer_of(channel_id, from)?;
        Ok(vec![(peer, env.clone())])
    }

    /// Unwind everything `from` left behind.
    ///
    /// Owned codes go first, taking their channels with them; any channels
    /// joined from the other side are swept afterwards. Each affected peer
    /// is told once per channel that the transfer is off.
    pub fn handle_disconnect(&mut self, from: SessionId) -> Outbound {
        let mut out = Vec::new();

        for code in self.sessions.codes(from) {
            for channel_id in self.sessions.channels_of_code(from, &code) {
                if let Ok(peer) = self.channels.peer_of(&channel_id, from) {
                    let _ = self.channels.unbind(&channel_id);
                    self.sessions.remove_channel(peer, &channel_id);
                    out.push((peer, Envelope::cancel(&channel_id)));
                }
            }
            self.sessions.remove_code(from, &code);
            if self.codes.release(&code).is_err() {
                tracing::warn!(session = from, code, "stale code in session cleanup");
            }
        }

        for channel_id in self.sessions.channels(from) {
            if let Ok(peer) = self.channels.peer_of(&channel_id, from) {
                let _ = self.channels.unbind(&channel_id);
                self.sessions.remove_channel(peer, &channel_id);
                out.push((peer, Envelope::cancel(&channel_id)));
            }
        }

        self.sessions.remove_session(from);
        tracing::info!(session = from, notified = out.len(), "session cleaned up");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SENDER: SessionId = 1;
    const RECEIVER: SessionId = 2;
    const OTHER: SessionId = 3;

    fn allocate(router: &mut MessageRouter, session: SessionId) -> String {
        let mut req = Envelope::new(action::ALLOCATE);
        req.message_id = Some("m-alloc".to_string());
        let out = router.handle_message(session, req);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, session);
        assert!(out[0].1.error.is_none());
        out[0].1.code.clone().expect("allocate reply carries a code")
    }

    fn download(router: &mut MessageRouter, session: SessionId, code: &str, channel: &str) -> Outbound {
        let mut req = Envelope::new(action::DOWNLOAD);
        req.message_id = Some("m-dl".to_string());
        req.code = Some(code.to_string());
        req.channel_id = Some(channel.to_string());
        router.handle_message(session, req)
    }

    #[test]
    fn allocate_replies_with_code_and_echoes_the_request() {
        let mut router = MessageRouter::new();
        let mut req = Envelope::new(action::ALLOCATE);
        req.message_id = Some("m-1".to_string());
        req.extra.insert("tag".to_string(), json!("mine"));

        let out = router.handle_message(SENDER, req);
        let (to, reply) = &out[0];
        assert_eq!(*to, SENDER);
        assert_eq!(reply.message_id.as_deref(), Some("m-1"));
        assert_eq!(reply.extra.get("tag"), Some(&json!("mine")));
        assert!(reply.code.is_some());
    }

    #[test]
    fn download_binds_a_channel_and_notifies_both_sides() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);

        let out = download(&mut router, RECEIVER, &code, "ch-1");
        assert_eq!(out.len(), 2);

        let (to, reply) = &out[0];
        assert_eq!(*to, RECEIVER);
        assert_eq!(reply.action, action::DOWNLOAD);
        assert_eq!(reply.message_id.as_deref(), Some("m-dl"));
        assert!(reply.error.is_none());

        let (to, connect) = &out[1];
        assert_eq!(*to, SENDER);
        assert_eq!(connect.action, action::CONNECT);
        assert_eq!(connect.code.as_deref(), Some(code.as_str()));
        assert_eq!(connect.channel_id.as_deref(), Some("ch-1"));
        assert!(connect.message_id.is_none());
    }

    #[test]
    fn download_of_unknown_code_echoes_the_error() {
        let mut router = MessageRouter::new();
        let out = download(&mut router, RECEIVER, "000000", "ch-1");
        assert_eq!(out.len(), 1);
        let (to, reply) = &out[0];
        assert_eq!(*to, RECEIVER);
        assert_eq!(reply.message_id.as_deref(), Some("m-dl"));
        assert_eq!(
            reply.error.as_deref(),
            Some("code 000000 does not exist")
        );
    }

    #[test]
    fn downloading_your_own_code_is_rejected() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        let out = download(&mut router, SENDER, &code, "ch-1");
        assert_eq!(out.len(), 1);
        assert!(out[0].1.error.as_deref().unwrap().contains("your own code"));
    }

    #[test]
    fn duplicate_channel_id_is_rejected() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let out = download(&mut router, OTHER, &code, "ch-1");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, OTHER);
        assert_eq!(
            out[0].1.error.as_deref(),
            Some("channel ch-1 already exists")
        );
    }

    #[test]
    fn signaling_frames_are_forwarded_verbatim() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let offer = Envelope::with_payload(action::OFFER, "ch-1", json!({"sdp": "v=0"}));
        let out = router.handle_message(SENDER, offer.clone());
        assert_eq!(out, vec![(RECEIVER, offer)]);

        let candidate = Envelope::with_payload(action::ICE_CANDIDATE, "ch-1", json!({"mid": 0}));
        let out = router.handle_message(RECEIVER, candidate.clone());
        assert_eq!(out, vec![(SENDER, candidate)]);
    }

    #[test]
    fn outsiders_cannot_inject_into_a_channel() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let offer = Envelope::with_payload(action::OFFER, "ch-1", json!({}));
        let out = router.handle_message(OTHER, offer);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, OTHER);
        assert_eq!(
            out[0].1.error.as_deref(),
            Some("not a member of channel ch-1")
        );
    }

    #[test]
    fn frames_without_a_channel_are_dropped_silently() {
        let mut router = MessageRouter::new();
        let out = router.handle_message(SENDER, Envelope::new(action::OFFER));
        assert!(out.is_empty());
        let out = router.handle_message(SENDER, Envelope::new(action::CANCEL));
        assert!(out.is_empty());
    }

    #[test]
    fn cancel_tears_down_the_channel_and_forwards() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let cancel = Envelope::cancel("ch-1");
        let out = router.handle_message(RECEIVER, cancel.clone());
        assert_eq!(out, vec![(SENDER, cancel)]);

        // The channel is gone; further traffic on it fails.
        let offer = Envelope::with_payload(action::OFFER, "ch-1", json!({}));
        let out = router.handle_message(SENDER, offer);
        assert_eq!(
            out[0].1.error.as_deref(),
            Some("channel ch-1 does not exist")
        );
    }

    #[test]
    fn complete_allows_a_fresh_download_of_the_same_code() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        router.handle_message(SENDER, Envelope::complete("ch-1"));
        let out = download(&mut router, RECEIVER, &code, "ch-2");
        assert_eq!(out.len(), 2);
        assert!(out[0].1.error.is_none());
    }

    #[test]
    fn delete_requires_ownership() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);

        let mut req = Envelope::new(action::DELETE);
        req.code = Some(code.clone());
        let out = router.handle_message(RECEIVER, req);
        assert_eq!(out[0].0, RECEIVER);
        assert!(out[0].1.error.as_deref().unwrap().contains("owned by another"));

        // Still downloadable afterwards.
        let out = download(&mut router, RECEIVER, &code, "ch-1");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn delete_cancels_running_transfers_before_replying() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let mut req = Envelope::new(action::DELETE);
        req.message_id = Some("m-del".to_string());
        req.code = Some(code.clone());
        let out = router.handle_message(SENDER, req);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, RECEIVER);
        assert_eq!(out[0].1.action, action::CANCEL);
        assert_eq!(out[0].1.channel_id.as_deref(), Some("ch-1"));
        assert_eq!(out[1].0, SENDER);
        assert_eq!(out[1].1.message_id.as_deref(), Some("m-del"));

        let out = download(&mut router, RECEIVER, &code, "ch-2");
        assert!(out[0].1.error.as_deref().unwrap().contains("does not exist"));
    }

    #[test]
    fn disconnect_cleans_codes_and_notifies_peers_once() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let out = router.handle_disconnect(SENDER);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, RECEIVER);
        assert_eq!(out[0].1.action, action::CANCEL);
        assert_eq!(out[0].1.channel_id.as_deref(), Some("ch-1"));

        // Code and channel are both gone.
        let out = download(&mut router, RECEIVER, &code, "ch-2");
        assert!(out[0].1.error.as_deref().unwrap().contains("does not exist"));
    }

    #[test]
    fn receiver_disconnect_cancels_toward_the_sender() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        let out = router.handle_disconnect(RECEIVER);
        assert_eq!(out, vec![(SENDER, Envelope::cancel("ch-1"))]);

        // The code survives; only the channel died.
        let out = download(&mut router, OTHER, &code, "ch-2");
        assert_eq!(out.len(), 2);
        assert!(out[0].1.error.is_none());
    }

    #[test]
    fn disconnect_with_nothing_registered_is_a_no_op() {
        let mut router = MessageRouter::new();
        assert!(router.handle_disconnect(OTHER).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut router = MessageRouter::new();
        let code = allocate(&mut router, SENDER);
        download(&mut router, RECEIVER, &code, "ch-1");

        assert_eq!(router.handle_disconnect(SENDER).len(), 1);
        assert!(router.handle_disconnect(SENDER).is_empty());
    }

    #[test]
    fn exhausted_registry_reports_resource_error() {
        let mut router = MessageRouter::with_codes(CodeRegistry::with_space(10, 10, 3));
        allocate(&mut router, SENDER);

        let out = router.handle_message(SENDER, Envelope::new(action::ALLOCATE));
        assert_eq!(
            out[0].1.error.as_deref(),
            Some("no share codes available")
        );
    }
}
