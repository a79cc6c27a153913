//! Relay transport seam
//!
//! The messaging layer only ever sees a pair of text-frame channels, so
//! tests can substitute an in-memory pair for the real websocket. The
//! websocket bridge lives here: one task per direction, torn down when
//! either side drops its half.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, Result};

/// Both directions of one relay connection, as raw text frames.
///
/// Dropping `outbound` closes the underlying connection.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl Transport {
    /// Open a websocket to the relay and bridge it onto channel halves.
    pub async fn connect_ws(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Self { outbound, inbound })
    }

    /// Two directly wired transports. What one sends the other receives.
    pub fn pair() -> (Transport, Transport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Transport {
                outbound: a_tx,
                inbound: a_rx,
            },
            Transport {
                outbound: b_tx,
                inbound: b_rx,
            },
        )
    }
}

/// Factory the messaging layer calls to (re)establish its transport.
pub type Connector =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Transport>> + Send + Sync>;

pub fn ws_connector(url: impl Into<String>) -> Connector {
    let url = url.into();
    Arc::new(move || {
        let url = url.clone();
        Box::pin(async move { Transport::connect_ws(&url).await })
    })
}

/// Connector handing out transports prepared ahead of time.
#[cfg(test)]
pub(crate) fn queued_connector(transports: Vec<Transport>) -> Connector {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    let queue = Arc::new(Mutex::new(transports.into_iter().collect::<VecDeque<_>>()));
    Arc::new(move || {
        let queue = Arc::clone(&queue);
        Box::pin(async move {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(ClientError::Connect("no transport queued".to_string()))
        })
    })
}
