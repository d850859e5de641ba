//! `aocc` fabric: workers, mailboxes, connection handlers, services and the
//! router that together move [`Package`](aocc_core::Package)s between named
//! in-process components.

pub mod error;
pub mod lifecycle;
pub mod mailbox;
pub mod network;
pub mod service;

#[cfg(test)]
mod test_support;

pub use error::FabricError;
pub use lifecycle::RunState;
pub use mailbox::{BoxHandler, Direction, MessageBox};
pub use network::{ConnectionConfig, ConnectionHandler, InboundSink, PackageCodec};
pub use service::{
    ConfigService, FabricConfig, NoopHandler, PackageHandler, RouterConfig, RouterService,
    Service, ServiceBuilder, ServiceConfig, Worker, CONFIG_SERVICE_NAME,
};
