//! Relay domain errors
//!
//! Every variant here is a client-caused condition. The router catches
//! them at the dispatch boundary and echoes the failed message back with
//! the `error` field set; none of them tear down the connection.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("code {0} does not exist")]
    CodeNotFound(String),

    #[error("no share codes available")]
    CodesExhausted,

    #[error("code {0} is owned by another connection")]
    NotCodeOwner(String),

    #[error("cannot download from your own code {0}")]
    SelfDownload(String),

    #[error("channel {0} already exists")]
    ChannelExists(String),

    #[error("channel {0} does not exist")]
    ChannelNotFound(String),

    #[error("not a member of channel {0}")]
    NotChannelMember(String),
}
