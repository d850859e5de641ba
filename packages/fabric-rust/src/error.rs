//! Error type shared by every fabric component.

use std::time::Duration;

use aocc_core::{ChannelError, PackageError};

/// Errors produced by mailboxes, connection handlers, services and the router.
///
/// Protocol errors (wrong recipient, unknown package type, unknown route) are
/// not represented here: they are answered with a Response package instead of
/// being raised locally.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("message box {name:?} does not exist")]
    BoxNotFound { name: String },

    #[error("message box {name:?} is empty")]
    BoxEmpty { name: String },

    #[error("configuration could not be loaded (status code {code})")]
    ConfigLoad { code: u16 },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("operation cancelled by stop()")]
    Cancelled,

    #[error("a waiter for correlation id {0:?} is already registered")]
    DuplicateCorrelationId(String),

    #[error("endpoint {0:?} is already registered")]
    DuplicateEndpoint(String),

    #[error("worker finished without a result: {0}")]
    WorkerFailed(String),

    #[error("component is not running")]
    NotRunning,

    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FabricError {
    pub(crate) fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }
}
