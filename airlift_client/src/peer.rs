//! Peer connection capability
//!
//! ICE, SDP and the data channel are provided by the embedding
//! application; the transfer layer only needs the handful of operations
//! below. Offers, answers and candidates are opaque JSON values passed
//! through the relay untouched.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Events surfaced by a peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered candidate to signal to the other side.
    LocalCandidate(Value),
    /// The data channel is open; streaming may begin.
    ChannelOpen,
    /// A chunk arrived on the data channel.
    Data(Bytes),
    /// The connection died or was closed by the other side.
    Closed,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<Value>;

    /// Apply a remote offer and produce the answer.
    async fn accept_offer(&self, offer: Value) -> Result<Value>;

    async fn accept_answer(&self, answer: Value) -> Result<()>;

    async fn add_candidate(&self, candidate: Value) -> Result<()>;

    /// Whether remote candidates can be applied yet. Candidates arriving
    /// earlier are buffered by the session.
    fn signaling_stable(&self) -> bool;

    async fn send_chunk(&self, chunk: Bytes) -> Result<()>;

    /// Bytes queued on the data channel but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Resolves once the buffered amount has fallen back below the
    /// channel's low threshold.
    async fn wait_drained(&self);

    async fn close(&self);
}

/// Creates a peer connection per transfer.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self)
    -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)>;
}
