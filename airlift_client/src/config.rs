//! Client configuration.

use std::time::Duration;

/// Default correlated-reply timeout, also the sweep interval.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default slice size for outgoing file data.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Buffered-amount ceiling before the sender waits for a drain.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay websocket endpoint, e.g. `ws://host:9090/ws`.
    pub relay_url: String,
    pub reply_timeout: Duration,
    pub chunk_size: usize,
    pub high_water_mark: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9090/ws".to_string(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}
