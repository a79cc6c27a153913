//! Relay message envelope
//!
//! Every frame exchanged with the relay is a JSON object with an `action`
//! tag. The envelope models the routing fields (`messageId`, `code`,
//! `channelId`, `error`) explicitly and flattens the rest into `extra`, so
//! the relay can echo and forward messages it does not fully understand.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action tags used on the wire.
pub mod action {
    pub const ALLOCATE: &str = "allocate";
    pub const DELETE: &str = "delete";
    pub const DOWNLOAD: &str = "download";
    pub const CONNECT: &str = "connect";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "iceCandidate";
    pub const CANCEL: &str = "cancel";
    pub const COMPLETE: &str = "complete";
}

/// A single relay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: String,
    /// Correlation id, present only on reply-expecting requests and their
    /// replies. Stamped by the client messaging layer, never by callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Set by the relay when a request failed; the rest of the message is
    /// echoed back unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            message_id: None,
            code: None,
            channel_id: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Whether this action gets a correlated reply from the relay.
    ///
    /// `allocate`, `delete` and `download` are request/reply; everything
    /// else is fire-and-forget. The messaging layer attaches a message id
    /// exactly when this returns true.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self.action.as_str(),
            action::ALLOCATE | action::DELETE | action::DOWNLOAD
        )
    }

    /// Shape pushed to a code owner when someone starts a download.
    pub fn connect(code: &str, channel_id: &str) -> Self {
        let mut env = Self::new(action::CONNECT);
        env.code = Some(code.to_string());
        env.channel_id = Some(channel_id.to_string());
        env
    }

    pub fn cancel(channel_id: &str) -> Self {
        let mut env = Self::new(action::CANCEL);
        env.channel_id = Some(channel_id.to_string());
        env
    }

    pub fn complete(channel_id: &str) -> Self {
        let mut env = Self::new(action::COMPLETE);
        env.channel_id = Some(channel_id.to_string());
        env
    }

    /// Build a payload-carrying frame (`offer`, `answer`, `iceCandidate`).
    /// The payload field is named after the action itself.
    pub fn with_payload(action: &str, channel_id: &str, payload: Value) -> Self {
        let mut env = Self::new(action);
        env.channel_id = Some(channel_id.to_string());
        env.extra.insert(action.to_string(), payload);
        env
    }

    /// The payload field named after this envelope's action, if present.
    pub fn payload(&self) -> Option<&Value> {
        self.extra.get(&self.action)
    }

    /// Relay error reply: the original message with `error` filled in.
    pub fn error_echo(&self, message: impl ToString) -> Self {
        let mut echo = self.clone();
        echo.error = Some(message.to_string());
        echo
    }

    /// Parse a text frame. Malformed frames yield `None` and are dropped
    /// by callers without closing the connection.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
