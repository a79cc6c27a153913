//! WebSocket front end
//!
//! One axum route upgrades clients onto the relay. Each connection gets a
//! session id and an outbox task; inbound text frames are parsed and fed
//! through the shared router under a single lock, and whatever the router
//! returns is pushed into the destination outboxes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use airlift_proto::Envelope;

use crate::SessionId;
use crate::router::MessageRouter;

/// Default listen port.
pub const RELAY_PORT: u16 = 9090;

pub struct RelayState {
    router: Mutex<MessageRouter>,
    outboxes: Mutex<HashMap<SessionId, mpsc::UnboundedSender<Message>>>,
    next_session: AtomicU64,
}

impl RelayState {
    pub fn new(router: MessageRouter) -> Self {
        Self {
            router: Mutex::new(router),
            outboxes: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(MessageRouter::new())
    }
}

/// Build the axum router serving the relay on `/ws`.
pub fn create_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .with_state(state)
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, addr: SocketAddr) {
    let session = state.next_session.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    state.outboxes.lock().await.insert(session, outbox_tx);
    tracing::info!(session, client = %addr, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let Some(env) = Envelope::parse(&text) else {
                    tracing::debug!(session, "dropping malformed frame");
                    continue;
                };
                let outbound = state.router.lock().await.handle_message(session, env);
                deliver(&state, outbound).await;
            }
            Message::Close(_) => break,
            // Binary frames have no meaning here; pings are answered by axum.
            _ => {}
        }
    }

    let outbound = state.router.lock().await.handle_disconnect(session);
    deliver(&state, outbound).await;
    state.outboxes.lock().await.remove(&session);
    writer.abort();
    tracing::info!(session, "client disconnected");
}

async fn deliver(state: &RelayState, outbound: Vec<(SessionId, Envelope)>) {
    if outbound.is_empty() {
        return;
    }
    let outboxes = state.outboxes.lock().await;
    for (to, env) in outbound {
        let text = match env.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(to, error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        match outboxes.get(&to) {
            Some(tx) => {
                let _ = tx.send(Message::Text(text.into()));
            }
            None => tracing::debug!(to, "peer already gone, frame dropped"),
        }
    }
}

/// Serve the relay until `cancel` fires.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<RelayState>,
    cancel: Option<CancellationToken>,
) -> Result<()> {
    let app = create_router(state);
    tracing::info!(addr = %listener.local_addr()?, "relay listening");

    if let Some(ct) = cancel {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            tracing::info!("relay shutting down gracefully");
        })
        .await?;
    } else {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}
