//! Domain handlers that ship with the fabric.
//!
//! Each handler implements [`PackageHandler`] and runs inside an ordinary
//! [`Service`](crate::service::Service) under its well-known name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use aocc_core::{status, subjects, DottedStorage, Package, Value};

use crate::service::{PackageHandler, Service};

// ---------------------------------------------------------------------------
// ConfigService
// ---------------------------------------------------------------------------

/// Serves configuration to services performing the startup handshake.
///
/// Answers `get_config` Requests with `200` and the whole configuration tree.
/// Any other subject gets `404` / `unknown_subject` with the request as
/// payload. Run it in a service named
/// [`CONFIG_SERVICE_NAME`](crate::service::CONFIG_SERVICE_NAME).
#[derive(Debug, Default)]
pub struct ConfigService {
    storage: RwLock<DottedStorage>,
}

impl ConfigService {
    #[must_use]
    pub fn new(data: BTreeMap<String, Value>) -> Self {
        Self {
            storage: RwLock::new(DottedStorage::from_map(data)),
        }
    }

    /// Sets a value served to subsequent `get_config` requests.
    pub fn set(&self, path: &str, value: Value) {
        self.storage.write().set(path, value);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.storage.read().get(path).cloned()
    }

    fn snapshot(&self) -> Value {
        Value::Map(self.storage.read().data().clone())
    }
}

#[async_trait]
impl PackageHandler for ConfigService {
    async fn on_request(&self, service: &Service, package: Package) {
        let reply = if package.subject() == subjects::GET_CONFIG {
            debug!(requester = %package.sender(), "serving configuration");
            package.reply(service.name(), subjects::GET_CONFIG, status::OK, self.snapshot())
        } else {
            warn!(
                requester = %package.sender(),
                subject = %package.subject(),
                "unknown configuration subject"
            );
            package.reply(
                service.name(),
                subjects::UNKNOWN_SUBJECT,
                status::NOT_FOUND,
                package.clone(),
            )
        };
        service.send_package(reply);
    }
}
