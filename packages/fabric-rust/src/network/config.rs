//! Connection-level configuration.

use std::time::Duration;

/// Default maximum encoded package size accepted by [`crate::network::PackageCodec`].
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Per-connection configuration controlling the handler's loop cadence.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long the dispatch and writer loops sleep when their queue is empty.
    /// A push wakes them earlier.
    pub idle_poll_interval: Duration,
    /// How long the reader loop waits between polls of the inbound channel.
    /// `Duration::ZERO` means a tight poll that only yields to the scheduler.
    pub read_poll_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_millis(200),
            read_poll_interval: Duration::from_millis(1),
        }
    }
}
