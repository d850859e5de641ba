//! Actors, workers and routing.
//!
//! 1. **Workers** (`worker`): one-shot background tasks with captured result
//! 2. **Handlers** (`handler`, `domain`): application behavior behind a trait
//! 3. **Services** (`actor`, `pending`): name-addressed actors with
//!    request/response correlation and the config handshake
//! 4. **Routing** (`router`): hub forwarding packages between endpoints by
//!    recipient name

pub mod actor;
pub mod config;
pub mod domain;
pub mod handler;
pub mod pending;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use actor::{Service, ServiceBuilder};
pub use config::{FabricConfig, RouterConfig, ServiceConfig, CONFIG_SERVICE_NAME};
pub use domain::ConfigService;
pub use handler::{NoopHandler, PackageHandler};
pub use pending::PendingResponses;
pub use router::RouterService;
pub use worker::Worker;
