//! Connection handling, wire framing, and connection configuration.

pub mod codec;
pub mod config;
pub mod connection;

pub use codec::PackageCodec;
pub use config::*;
pub use connection::*;
