//! Relay server for code-based peer-to-peer transfers.
//!
//! The relay never sees file data. It mints short share codes, pairs the
//! two ends of a transfer into channels, forwards their signaling frames,
//! and cleans up after either side disconnects.

pub mod channels;
pub mod codes;
pub mod error;
pub mod router;
pub mod server;
pub mod sessions;

pub use error::{RelayError, Result};
pub use router::MessageRouter;
pub use server::{RelayState, create_router, run_server};

/// Identifies one live client connection.
///
/// Assigned from a counter at upgrade time so the registries never hold a
/// reference to the socket itself.
pub type SessionId = u64;
