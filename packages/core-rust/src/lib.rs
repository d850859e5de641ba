//! `aocc` core: the `Package` envelope, payload values, dotted configuration
//! storage, and the duplex channel abstraction.

pub mod channel;
pub mod dotted;
pub mod error;
pub mod messages;
pub mod types;

pub use channel::{pipe, DuplexChannel, PipeEnd};
pub use dotted::DottedStorage;
pub use error::{ChannelError, PackageError};
pub use messages::{status, subjects, Package, PackageType, Payload, RawPackage};
pub use types::Value;
