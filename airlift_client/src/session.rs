//! Per-transfer session state
//!
//! One session per channel, on both sides. The session owns the peer
//! connection, buffers remote candidates until signaling settles, and
//! tracks the lifecycle: a receiver announces its intent and waits for
//! the offer, a sender starts connecting as soon as it is told to dial
//! in, and either side can end in `Complete` or `Aborted` exactly once.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use airlift_proto::FileManifest;

use crate::engine::ChunkReceiver;
use crate::error::Result;
use crate::peer::PeerConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the other side to appear.
    Announcing,
    /// Signaling in progress.
    Connecting,
    /// Data channel open, bytes flowing.
    Streaming,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

pub struct TransferSession {
    channel_id: String,
    role: Role,
    /// Share code this channel belongs to; set on the sending side only.
    code: Option<String>,
    state: SessionState,
    peer: Arc<dyn PeerConnection>,
    pending_candidates: Vec<Value>,
    cancel: CancellationToken,
    assembler: Option<ChunkReceiver>,
}

impl TransferSession {
    pub fn sender(channel_id: &str, code: &str, peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            role: Role::Sender,
            code: Some(code.to_string()),
            state: SessionState::Connecting,
            peer,
            pending_candidates: Vec::new(),
            cancel: CancellationToken::new(),
            assembler: None,
        }
    }

    pub fn receiver(channel_id: &str, peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            role: Role::Receiver,
            code: None,
            state: SessionState::Announcing,
            peer,
            pending_candidates: Vec::new(),
            cancel: CancellationToken::new(),
            assembler: None,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Complete | SessionState::Aborted)
    }

    pub fn peer(&self) -> Arc<dyn PeerConnection> {
        Arc::clone(&self.peer)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn assembler_mut(&mut self) -> Option<&mut ChunkReceiver> {
        self.assembler.as_mut()
    }

    /// Sender side: produce the local offer.
    pub async fn start_offer(&mut self) -> Result<Value> {
        self.peer.create_offer().await
    }

    /// Receiver side: apply the remote offer, arm the reassembler with
    /// the announced manifest and produce the answer.
    pub async fn accept_offer(&mut self, offer: Value, manifest: FileManifest) -> Result<Value> {
        self.assembler = Some(ChunkReceiver::new(manifest));
        let answer = self.peer.accept_offer(offer).await?;
        self.state = SessionState::Connecting;
        self.flush_candidates().await?;
        Ok(answer)
    }

    /// Sender side: apply the remote answer.
    pub async fn accept_answer(&mut self, answer: Value) -> Result<()> {
        self.peer.accept_answer(answer).await?;
        self.flush_candidates().await
    }

    /// Apply a remote candidate, or park it until signaling is stable.
    pub async fn add_candidate(&mut self, candidate: Value) -> Result<()> {
        if self.peer.signaling_stable() {
            self.peer.add_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    async fn flush_candidates(&mut self) -> Result<()> {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.peer.add_candidate(candidate).await?;
        }
        Ok(())
    }

    pub fn mark_streaming(&mut self) {
        if !self.is_terminal() {
            self.state = SessionState::Streaming;
        }
    }

    /// Terminal success. Stops the engine and releases the peer.
    pub async fn finish(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state = SessionState::Complete;
        self.cancel.cancel();
        self.peer.close().await;
    }

    /// Terminal failure or cancellation. Idempotent.
    pub async fn abort(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state = SessionState::Aborted;
        self.cancel.cancel();
        self.peer.close().await;
    }
}
