//! Correlated relay messaging
//!
//! `RelayLink` wraps one relay connection and gives callers two send
//! modes: `request`, which stamps a message id and resolves with the
//! correlated reply, and `notify`, which is fire-and-forget. Inbound
//! frames without a message id fan out to registered listeners.
//!
//! The connection is opened on first use and closed again whenever there
//! is nothing outstanding, unless a request asked to keep it open. A
//! single sweep task expires pending requests; because requests share one
//! timeout they expire in insertion order, so the sweep stops at the
//! first entry that is still fresh. Changing the timeout at runtime only
//! affects requests issued afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use airlift_proto::Envelope;

use crate::error::{ClientError, Result};
use crate::wire::{Connector, Transport};

pub type ListenerId = Uuid;

struct Pending {
    id: String,
    deadline: Instant,
    reply: oneshot::Sender<Result<Envelope>>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<Pending>>,
    listeners: Mutex<HashMap<ListenerId, mpsc::UnboundedSender<Envelope>>>,
}

struct Active {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

pub struct RelayLink {
    connector: Connector,
    shared: Arc<Shared>,
    active: Mutex<Option<Active>>,
    connecting: AtomicBool,
    timeout: Mutex<Duration>,
}

impl RelayLink {
    pub fn new(connector: Connector, reply_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            connector,
            shared: Arc::new(Shared::default()),
            active: Mutex::new(None),
            connecting: AtomicBool::new(false),
            timeout: Mutex::new(reply_timeout),
        })
    }

    /// Applies to requests issued from now on; requests already in flight
    /// keep their original deadline.
    pub fn set_reply_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap() = timeout;
    }

    fn reply_timeout(&self) -> Duration {
        *self.timeout.lock().unwrap()
    }

    /// Send a reply-expecting request and close the link afterwards if
    /// nothing else is using it.
    pub async fn request(self: &Arc<Self>, env: Envelope) -> Result<Envelope> {
        self.request_inner(env, false).await
    }

    /// Send a reply-expecting request and leave the link open regardless.
    pub async fn request_keep_open(self: &Arc<Self>, env: Envelope) -> Result<Envelope> {
        self.request_inner(env, true).await
    }

    async fn request_inner(self: &Arc<Self>, mut env: Envelope, keep_open: bool) -> Result<Envelope> {
        debug_assert!(env.expects_reply(), "{} is fire-and-forget", env.action);
        let outbound = self.ensure_connected().await?;

        let id = Uuid::new_v4().to_string();
        env.message_id = Some(id.clone());
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let deadline = Instant::now() + self.reply_timeout();
            self.shared.pending.lock().unwrap().push_back(Pending {
                id: id.clone(),
                deadline,
                reply: reply_tx,
            });
        }

        let text = env.encode()?;
        if outbound.send(text).is_err() {
            remove_pending(&self.shared, &id);
            return Err(ClientError::TransportClosed);
        }

        let result = match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::TransportClosed),
        };
        if !keep_open {
            self.close_if_idle();
        }

        match result {
            Ok(reply) => match reply.error {
                Some(message) => Err(ClientError::Server(message)),
                None => Ok(reply),
            },
            Err(e) => Err(e),
        }
    }

    /// Fire-and-forget send.
    pub async fn notify(self: &Arc<Self>, env: Envelope) -> Result<()> {
        let outbound = self.ensure_connected().await?;
        let text = env.encode()?;
        let sent = outbound
            .send(text)
            .map_err(|_| ClientError::TransportClosed);
        // The writer drains its queue before exiting, so the frame still
        // goes out even when this drops the link.
        self.close_if_idle();
        sent
    }

    /// Register for uncorrelated inbound frames. The receiver's channel
    /// closes when the link goes down.
    pub fn listen(&self) -> (ListenerId, mpsc::UnboundedReceiver<Envelope>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unlisten(&self, id: ListenerId) {
        self.shared.listeners.lock().unwrap().remove(&id);
        self.close_if_idle();
    }

    pub fn is_open(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Drop the connection if nothing is waiting on it.
    pub fn close_if_idle(&self) {
        let idle = self.shared.pending.lock().unwrap().is_empty()
            && self.shared.listeners.lock().unwrap().is_empty();
        if idle {
            self.teardown();
        }
    }

    /// Drop the connection. Pending requests fail with `TransportClosed`
    /// and listener channels close.
    pub fn close(&self) {
        self.teardown();
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<mpsc::UnboundedSender<String>> {
        if let Some(active) = self.active.lock().unwrap().as_ref() {
            return Ok(active.outbound.clone());
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::ConnectInFlight);
        }
        let result = (self.connector)().await;
        self.connecting.store(false, Ordering::SeqCst);
        let transport = result?;

        let outbound = transport.outbound.clone();
        self.install(transport);
        tracing::debug!("relay link established");
        Ok(outbound)
    }

    fn install(self: &Arc<Self>, transport: Transport) {
        let reader = tokio::spawn(read_loop(
            transport.inbound,
            Arc::clone(&self.shared),
            Arc::downgrade(self),
        ));
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&self.shared), Arc::downgrade(self)));
        *self.active.lock().unwrap() = Some(Active {
            outbound: transport.outbound,
            reader,
            sweeper,
        });
    }

    fn teardown(&self) {
        let Some(active) = self.active.lock().unwrap().take() else {
            return;
        };
        active.reader.abort();
        active.sweeper.abort();
        drop(active.outbound);

        let drained: Vec<Pending> = self.shared.pending.lock().unwrap().drain(..).collect();
        for pending in drained {
            let _ = pending.reply.send(Err(ClientError::TransportClosed));
        }
        self.shared.listeners.lock().unwrap().clear();
        tracing::debug!("relay link closed");
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_pending(shared: &Shared, id: &str) -> Option<Pending> {
    let mut pending = shared.pending.lock().unwrap();
    let index = pending.iter().position(|p| p.id == id)?;
    pending.remove(index)
}

async fn read_loop(
    mut inbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    link: Weak<RelayLink>,
) {
    while let Some(text) = inbound.recv().await {
        let Some(mut env) = Envelope::parse(&text) else {
            tracing::debug!("dropping malformed frame");
            continue;
        };
        match env.message_id.take() {
            Some(id) => match remove_pending(&shared, &id) {
                Some(pending) => {
                    let _ = pending.reply.send(Ok(env));
                }
                None => {
                    tracing::warn!(error = %ClientError::UnmatchedReply(id), "protocol error");
                }
            },
            None => {
                let listeners = shared.listeners.lock().unwrap();
                for tx in listeners.values() {
                    let _ = tx.send(env.clone());
                }
            }
        }
    }
    // The relay hung up on us.
    if let Some(link) = link.upgrade() {
        link.teardown();
    }
}

async fn sweep_loop(shared: Arc<Shared>, link: Weak<RelayLink>) {
    loop {
        let interval = match link.upgrade() {
            Some(link) => link.reply_timeout(),
            None => return,
        };
        tokio::time::sleep(interval).await;

        let now = Instant::now();
        let expired: Vec<Pending> = {
            let mut pending = shared.pending.lock().unwrap();
            let mut expired = Vec::new();
            // Deadlines are monotone within the queue, so stop at the
            // first entry that has not expired yet.
            while pending.front().is_some_and(|p| p.deadline <= now) {
                if let Some(p) = pending.pop_front() {
                    expired.push(p);
                }
            }
            expired
        };
        for pending in expired {
            tracing::debug!(id = %pending.id, "request timed out");
            let _ = pending.reply.send(Err(ClientError::Timeout));
        }
    }
}
