//! Transfer orchestration
//!
//! `TransferManager` is the user-facing surface: publish files under a
//! code, redeem a code, cancel, and watch a single event stream for
//! everything that happens. It owns one relay link and one session per
//! active channel, wires peer connection events into the state machines,
//! and funnels every failure into a `TransferEvent::Error` so callers
//! have one place to look. Failed transfers are reported, never retried.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use airlift_proto::{Envelope, FileEntry, FileManifest, MANIFEST_FIELD, ManifestError, action};

use crate::config::ClientConfig;
use crate::engine::{ChunkSender, SendFile};
use crate::error::{ClientError, Result};
use crate::messaging::{ListenerId, RelayLink};
use crate::peer::{PeerEvent, PeerFactory};
use crate::session::{Role, TransferSession};

/// Everything the embedding application hears about.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Files are published and the code can be handed out.
    ShareReady { code: String },
    ShareRemoved { code: String },
    TransferStarted { channel_id: String, role: Role },
    SendProgress {
        channel_id: String,
        file_index: usize,
        sent_bytes: u64,
    },
    ReceiveProgress {
        channel_id: String,
        file_index: usize,
        received_bytes: u64,
    },
    /// A whole file arrived and was cut out of the stream.
    FileReceived {
        channel_id: String,
        file_index: usize,
        file_name: String,
        data: Bytes,
    },
    TransferComplete { channel_id: String, role: Role },
    TransferAborted { channel_id: String, role: Role },
    Error { message: String },
}

#[derive(Clone)]
struct Share {
    files: Arc<Vec<SendFile>>,
    manifest: FileManifest,
}

struct SessionHandle {
    session: Arc<tokio::sync::Mutex<TransferSession>>,
    // Dropped, not aborted: the pump exits on its own once the session's
    // cancellation token fires.
    _pump: JoinHandle<()>,
}

pub struct TransferManager {
    link: Arc<RelayLink>,
    peers: Arc<dyn PeerFactory>,
    config: ClientConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    shares: Mutex<HashMap<String, Share>>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    listener: Mutex<Option<ListenerId>>,
}

impl TransferManager {
    pub fn new(
        link: Arc<RelayLink>,
        peers: Arc<dyn PeerFactory>,
        config: ClientConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            link,
            peers,
            config,
            events,
            shares: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        });
        (manager, events_rx)
    }

    /// Publish files and return the share code to hand out.
    pub async fn allocate(self: &Arc<Self>, paths: Vec<PathBuf>) -> Result<String> {
        self.funnel(self.allocate_inner(paths).await)
    }

    async fn allocate_inner(self: &Arc<Self>, paths: Vec<PathBuf>) -> Result<String> {
        if paths.is_empty() {
            return Err(ClientError::Manifest(ManifestError::Empty));
        }
        let mut files = Vec::with_capacity(paths.len());
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let meta = tokio::fs::metadata(&path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            entries.push(FileEntry {
                file_name: name.clone(),
                file_bytes: meta.len(),
            });
            files.push(SendFile {
                name,
                path,
                bytes: meta.len(),
            });
        }

        let reply = self
            .link
            .request_keep_open(Envelope::new(action::ALLOCATE))
            .await?;
        let code = reply
            .code
            .ok_or_else(|| ClientError::Protocol("allocate reply carries no code".to_string()))?;

        self.ensure_listening();
        self.shares.lock().unwrap().insert(
            code.clone(),
            Share {
                files: Arc::new(files),
                manifest: FileManifest::new(entries),
            },
        );
        tracing::info!(code, "share published");
        self.emit(TransferEvent::ShareReady { code: code.clone() });
        Ok(code)
    }

    /// Withdraw a share, cancelling any transfer still running against it.
    pub async fn delete(self: &Arc<Self>, code: &str) -> Result<()> {
        self.funnel(self.delete_inner(code).await)
    }

    async fn delete_inner(self: &Arc<Self>, code: &str) -> Result<()> {
        for (channel_id, session) in self.sessions_snapshot() {
            let mut s = session.lock().await;
            if s.code() != Some(code) || s.is_terminal() {
                continue;
            }
            s.abort().await;
            drop(s);
            self.take_session(&channel_id);
            let _ = self.link.notify(Envelope::cancel(&channel_id)).await;
            self.emit(TransferEvent::TransferAborted {
                channel_id,
                role: Role::Sender,
            });
        }

        let mut req = Envelope::new(action::DELETE);
        req.code = Some(code.to_string());
        self.link.request(req).await?;

        self.shares.lock().unwrap().remove(code);
        tracing::info!(code, "share withdrawn");
        self.emit(TransferEvent::ShareRemoved {
            code: code.to_string(),
        });
        self.unlisten_when_idle();
        Ok(())
    }

    /// Redeem a code. Returns the channel id identifying the transfer in
    /// subsequent events.
    pub async fn download(self: &Arc<Self>, code: &str) -> Result<String> {
        self.funnel(self.download_inner(code).await)
    }

    async fn download_inner(self: &Arc<Self>, code: &str) -> Result<String> {
        let channel_id = Uuid::new_v4().to_string();
        let (peer, peer_events) = self.peers.create().await?;
        let session = TransferSession::receiver(&channel_id, peer);
        self.install_session(session, peer_events, None);
        self.ensure_listening();

        let mut req = Envelope::new(action::DOWNLOAD);
        req.code = Some(code.to_string());
        req.channel_id = Some(channel_id.clone());
        match self.link.request_keep_open(req).await {
            Ok(_) => {
                tracing::info!(code, channel = %channel_id, "download accepted");
                self.emit(TransferEvent::TransferStarted {
                    channel_id: channel_id.clone(),
                    role: Role::Receiver,
                });
                Ok(channel_id)
            }
            Err(e) => {
                if let Some(handle) = self.take_session(&channel_id) {
                    handle.session.lock().await.abort().await;
                }
                self.unlisten_when_idle();
                Err(e)
            }
        }
    }

    /// Abort one running transfer from this side.
    pub async fn cancel(self: &Arc<Self>, channel_id: &str) -> Result<()> {
        self.funnel(self.cancel_inner(channel_id).await)
    }

    async fn cancel_inner(self: &Arc<Self>, channel_id: &str) -> Result<()> {
        let Some(handle) = self.take_session(channel_id) else {
            return Ok(());
        };
        let role = {
            let mut s = handle.session.lock().await;
            let role = s.role();
            s.abort().await;
            role
        };
        self.link.notify(Envelope::cancel(channel_id)).await?;
        self.emit(TransferEvent::TransferAborted {
            channel_id: channel_id.to_string(),
            role,
        });
        self.unlisten_when_idle();
        Ok(())
    }

    /// Applies to requests issued from now on.
    pub fn set_reply_timeout(&self, timeout: Duration) {
        self.link.set_reply_timeout(timeout);
    }

    fn funnel<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.emit_error(e);
        }
        result
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, e: &ClientError) {
        tracing::warn!(error = %e, "transfer error");
        self.emit(TransferEvent::Error {
            message: e.to_string(),
        });
    }

    fn sessions_snapshot(&self) -> Vec<(String, Arc<tokio::sync::Mutex<TransferSession>>)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(&h.session)))
            .collect()
    }

    fn get_session(&self, channel_id: &str) -> Option<Arc<tokio::sync::Mutex<TransferSession>>> {
        self.sessions
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|h| Arc::clone(&h.session))
    }

    fn take_session(&self, channel_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().remove(channel_id)
    }

    fn install_session(
        self: &Arc<Self>,
        session: TransferSession,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        files: Option<Arc<Vec<SendFile>>>,
    ) {
        let channel_id = session.channel_id().to_string();
        let cancel = session.cancel_token();
        let session = Arc::new(tokio::sync::Mutex::new(session));
        let pump = tokio::spawn(Arc::clone(self).pump_peer_events(
            channel_id.clone(),
            Arc::clone(&session),
            files,
            peer_events,
            cancel.clone(),
        ));
        self.sessions.lock().unwrap().insert(
            channel_id,
            SessionHandle {
                session,
                _pump: pump,
            },
        );
    }

    /// Start the relay listener once; it lives until the link closes or
    /// the manager goes idle.
    fn ensure_listening(self: &Arc<Self>) {
        let mut guard = self.listener.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let (id, rx) = self.link.listen();
        *guard = Some(id);
        drop(guard);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.relay_loop(rx).await });
    }

    /// Drop the listener and the link once nothing is shared or running.
    fn unlisten_when_idle(&self) {
        let idle = self.shares.lock().unwrap().is_empty()
            && self.sessions.lock().unwrap().is_empty();
        if !idle {
            return;
        }
        if let Some(id) = self.listener.lock().unwrap().take() {
            self.link.unlisten(id);
        }
    }

    async fn relay_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(env) = rx.recv().await {
            if let Err(e) = self.handle_relay_frame(env).await {
                self.emit_error(&e);
            }
        }
        // The link is gone; nothing in flight can finish.
        self.shutdown().await;
    }

    async fn handle_relay_frame(self: &Arc<Self>, env: Envelope) -> Result<()> {
        match env.action.as_str() {
            action::CONNECT => self.on_connect(env).await,
            action::OFFER => self.on_offer(env).await,
            action::ANSWER => self.on_answer(env).await,
            action::ICE_CANDIDATE => self.on_candidate(env).await,
            action::CANCEL => self.on_peer_end(env, false).await,
            action::COMPLETE => self.on_peer_end(env, true).await,
            other => {
                tracing::debug!(action = other, "ignoring unexpected relay frame");
                Ok(())
            }
        }
    }

    /// Someone redeemed one of our codes: open a channel and offer.
    async fn on_connect(self: &Arc<Self>, env: Envelope) -> Result<()> {
        let (Some(code), Some(channel_id)) = (env.code.clone(), env.channel_id.clone()) else {
            return Ok(());
        };
        let Some(share) = self.shares.lock().unwrap().get(&code).cloned() else {
            tracing::debug!(code, "connect for an unknown code ignored");
            return Ok(());
        };
        if self.sessions.lock().unwrap().contains_key(&channel_id) {
            tracing::debug!(channel = %channel_id, "duplicate connect ignored");
            return Ok(());
        }

        let (peer, peer_events) = self.peers.create().await?;
        let mut session = TransferSession::sender(&channel_id, &code, peer);
        let offer = session.start_offer().await?;
        self.install_session(session, peer_events, Some(share.files));

        let mut frame = Envelope::with_payload(action::OFFER, &channel_id, offer);
        frame
            .extra
            .insert(MANIFEST_FIELD.to_string(), share.manifest.to_value());
        self.link.notify(frame).await?;
        self.emit(TransferEvent::TransferStarted {
            channel_id,
            role: Role::Sender,
        });
        Ok(())
    }

    /// The sender's offer arrived: validate the manifest and answer.
    async fn on_offer(self: &Arc<Self>, env: Envelope) -> Result<()> {
        let Some(channel_id) = env.channel_id.clone() else {
            return Ok(());
        };
        let Some(session) = self.get_session(&channel_id) else {
            return Ok(());
        };

        let manifest = match FileManifest::from_value(env.extra.get(MANIFEST_FIELD)) {
            Ok(m) => m,
            Err(e) => {
                session.lock().await.abort().await;
                self.take_session(&channel_id);
                let _ = self.link.notify(Envelope::cancel(&channel_id)).await;
                self.emit(TransferEvent::TransferAborted {
                    channel_id,
                    role: Role::Receiver,
                });
                self.unlisten_when_idle();
                return Err(e.into());
            }
        };
        let Some(offer) = env.payload().cloned() else {
            return Ok(());
        };

        let answer = session.lock().await.accept_offer(offer, manifest).await?;
        self.link
            .notify(Envelope::with_payload(action::ANSWER, &channel_id, answer))
            .await?;

        // Zero-length files are complete before any byte arrives.
        let (completed, done) = {
            let mut s = session.lock().await;
            match s.assembler_mut() {
                Some(asm) => (asm.drain_ready(), asm.is_complete()),
                None => return Ok(()),
            }
        };
        for file in completed {
            self.emit(TransferEvent::FileReceived {
                channel_id: channel_id.clone(),
                file_index: file.index,
                file_name: file.name,
                data: file.data,
            });
        }
        if done {
            self.finish_receive(&channel_id, &session).await;
        }
        Ok(())
    }

    async fn on_answer(self: &Arc<Self>, env: Envelope) -> Result<()> {
        let Some(channel_id) = env.channel_id.as_deref() else {
            return Ok(());
        };
        let Some(session) = self.get_session(channel_id) else {
            return Ok(());
        };
        let Some(answer) = env.payload().cloned() else {
            return Ok(());
        };
        session.lock().await.accept_answer(answer).await
    }

    async fn on_candidate(self: &Arc<Self>, env: Envelope) -> Result<()> {
        let Some(channel_id) = env.channel_id.as_deref() else {
            return Ok(());
        };
        let Some(session) = self.get_session(channel_id) else {
            return Ok(());
        };
        let Some(candidate) = env.payload().cloned() else {
            return Ok(());
        };
        session.lock().await.add_candidate(candidate).await
    }

    /// The other side ended the transfer, cleanly or not.
    async fn on_peer_end(self: &Arc<Self>, env: Envelope, completed: bool) -> Result<()> {
        let Some(channel_id) = env.channel_id.clone() else {
            return Ok(());
        };
        let Some(handle) = self.take_session(&channel_id) else {
            return Ok(());
        };
        let role = {
            let mut s = handle.session.lock().await;
            let role = s.role();
            if completed {
                s.finish().await;
            } else {
                s.abort().await;
            }
            role
        };
        self.emit(if completed {
            TransferEvent::TransferComplete { channel_id, role }
        } else {
            TransferEvent::TransferAborted { channel_id, role }
        });
        self.unlisten_when_idle();
        Ok(())
    }

    async fn pump_peer_events(
        self: Arc<Self>,
        channel_id: String,
        session: Arc<tokio::sync::Mutex<TransferSession>>,
        files: Option<Arc<Vec<SendFile>>>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = peer_events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                PeerEvent::LocalCandidate(candidate) => {
                    let frame =
                        Envelope::with_payload(action::ICE_CANDIDATE, &channel_id, candidate);
                    if let Err(e) = self.link.notify(frame).await {
                        self.emit_error(&e);
                    }
                }
                PeerEvent::ChannelOpen => {
                    let role = {
                        let mut s = session.lock().await;
                        s.mark_streaming();
                        s.role()
                    };
                    if role == Role::Sender {
                        if let Some(files) = files.clone() {
                            tokio::spawn(Arc::clone(&self).run_send(
                                channel_id.clone(),
                                Arc::clone(&session),
                                files,
                                cancel.clone(),
                            ));
                        }
                    }
                }
                PeerEvent::Data(bytes) => {
                    if let Err(e) = self.ingest(&channel_id, &session, &bytes).await {
                        self.emit_error(&e);
                    }
                }
                PeerEvent::Closed => {
                    self.peer_closed(&channel_id, &session).await;
                    break;
                }
            }
        }
    }

    /// Sender streaming phase, spawned when the data channel opens.
    async fn run_send(
        self: Arc<Self>,
        channel_id: String,
        session: Arc<tokio::sync::Mutex<TransferSession>>,
        files: Arc<Vec<SendFile>>,
        cancel: CancellationToken,
    ) {
        let peer = session.lock().await.peer();
        let engine = ChunkSender::new(
            peer,
            self.config.chunk_size,
            self.config.high_water_mark,
            cancel,
        );
        let events = self.events.clone();
        let progress_channel = channel_id.clone();
        let result = engine
            .run(&files, |file_index, sent_bytes| {
                let _ = events.send(TransferEvent::SendProgress {
                    channel_id: progress_channel.clone(),
                    file_index,
                    sent_bytes,
                });
            })
            .await;

        match result {
            // All bytes are queued; completion comes back from the
            // receiver once it has them.
            Ok(true) => tracing::debug!(channel = %channel_id, "send finished, awaiting confirmation"),
            Ok(false) => tracing::debug!(channel = %channel_id, "send stopped"),
            Err(e) => {
                self.emit_error(&e);
                if let Some(handle) = self.take_session(&channel_id) {
                    handle.session.lock().await.abort().await;
                }
                let _ = self.link.notify(Envelope::cancel(&channel_id)).await;
                self.emit(TransferEvent::TransferAborted {
                    channel_id,
                    role: Role::Sender,
                });
                self.unlisten_when_idle();
            }
        }
    }

    /// Receiver data path.
    async fn ingest(
        self: &Arc<Self>,
        channel_id: &str,
        session: &Arc<tokio::sync::Mutex<TransferSession>>,
        bytes: &[u8],
    ) -> Result<()> {
        let (completed, progress, done) = {
            let mut s = session.lock().await;
            s.mark_streaming();
            let Some(asm) = s.assembler_mut() else {
                tracing::debug!(channel = %channel_id, "data before the offer, dropped");
                return Ok(());
            };
            let completed = asm.push(bytes);
            let current = asm.current_index();
            (completed, (current, asm.progress(current)), asm.is_complete())
        };

        for file in completed {
            self.emit(TransferEvent::FileReceived {
                channel_id: channel_id.to_string(),
                file_index: file.index,
                file_name: file.name,
                data: file.data,
            });
        }
        if done {
            self.finish_receive(channel_id, session).await;
        } else {
            let (file_index, received_bytes) = progress;
            self.emit(TransferEvent::ReceiveProgress {
                channel_id: channel_id.to_string(),
                file_index,
                received_bytes,
            });
        }
        Ok(())
    }

    /// Everything in the manifest arrived: confirm and wind down.
    async fn finish_receive(
        self: &Arc<Self>,
        channel_id: &str,
        session: &Arc<tokio::sync::Mutex<TransferSession>>,
    ) {
        session.lock().await.finish().await;
        let _ = self.link.notify(Envelope::complete(channel_id)).await;
        self.take_session(channel_id);
        self.emit(TransferEvent::TransferComplete {
            channel_id: channel_id.to_string(),
            role: Role::Receiver,
        });
        self.unlisten_when_idle();
    }

    /// The peer connection died underneath a live session.
    async fn peer_closed(
        self: &Arc<Self>,
        channel_id: &str,
        session: &Arc<tokio::sync::Mutex<TransferSession>>,
    ) {
        let Some(_handle) = self.take_session(channel_id) else {
            return;
        };
        let role = {
            let mut s = session.lock().await;
            if s.is_terminal() {
                return;
            }
            let role = s.role();
            s.abort().await;
            role
        };
        let _ = self.link.notify(Envelope::cancel(channel_id)).await;
        self.emit(TransferEvent::TransferAborted {
            channel_id: channel_id.to_string(),
            role,
        });
        self.unlisten_when_idle();
    }

    /// The relay link closed: abort every open session and forget all
    /// shares. The other sides learn about it from the relay's own
    /// disconnect cleanup.
    async fn shutdown(self: &Arc<Self>) {
        let handles: Vec<(String, SessionHandle)> =
            self.sessions.lock().unwrap().drain().collect();
        for (channel_id, handle) in handles {
            let mut s = handle.session.lock().await;
            if s.is_terminal() {
                continue;
            }
            let role = s.role();
            s.abort().await;
            drop(s);
            self.emit(TransferEvent::TransferAborted { channel_id, role });
        }
        self.shares.lock().unwrap().clear();
        *self.listener.lock().unwrap() = None;
        tracing::info!("relay link lost, open transfers aborted");
    }
}
