//! Error types for package construction, encoding, and channel I/O.

use crate::messages::RawPackage;

/// Errors from building or (de)serializing a [`crate::Package`].
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("only <request> or <response> are allowed as package type, got {0:?}")]
    InvalidPackageType(String),
    #[error("failed to encode package: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode package: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors returned by a [`crate::DuplexChannel`] endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("no package ready on channel")]
    Empty,
    /// A frame arrived whose type tag is neither request nor response.
    /// The raw frame is handed back so the receiver can answer its sender.
    #[error("rejected frame from {} with package type {:?}", .0.sender, .0.package_type)]
    Rejected(Box<RawPackage>),
}
