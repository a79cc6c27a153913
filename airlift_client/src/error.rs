//! Client-side error taxonomy.

use airlift_proto::ManifestError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    TransportClosed,

    #[error("failed to reach the relay: {0}")]
    Connect(String),

    #[error("previous connection attempt still in progress")]
    ConnectInFlight,

    #[error("relay rejected the request: {0}")]
    Server(String),

    #[error("reply for unknown request {0}")]
    UnmatchedReply(String),

    #[error("unexpected relay reply: {0}")]
    Protocol(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("data channel closed before the transfer finished")]
    ChannelClosed,

    #[error("failed to read source file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Codec(#[from] serde_json::Error),
}
