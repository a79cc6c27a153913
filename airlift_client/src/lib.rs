//! Client core for code-based peer-to-peer transfers.
//!
//! Talks to the relay over a websocket for signaling and streams file
//! bytes over a peer data channel. The peer connection itself (ICE, SDP,
//! the data channel) is an external capability behind the traits in
//! [`peer`]; everything else lives here: the correlated request/reply
//! layer, the per-transfer state machines, and the chunking engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod messaging;
pub mod peer;
pub mod session;
pub mod wire;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use manager::{TransferEvent, TransferManager};
pub use messaging::RelayLink;
pub use session::{Role, SessionState, TransferSession};
