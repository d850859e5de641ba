use std::time::Duration;

use crate::network::ConnectionConfig;

/// Name of the service that answers `get_config` requests.
pub const CONFIG_SERVICE_NAME: &str = "ConfigService";

/// Service-level configuration.
///
/// Controls the startup configuration handshake and dispatch cadence.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Whether `start()` must fetch configuration before the service runs.
    pub config_required: bool,
    /// Recipient of the `get_config` request.
    pub config_service: String,
    /// Upper bound on the configuration handshake. `None` waits until the
    /// reply arrives or the service is stopped.
    pub config_timeout: Option<Duration>,
    /// Idle interval of the underlying connection handler loops.
    pub poll_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_required: true,
            config_service: CONFIG_SERVICE_NAME.to_string(),
            config_timeout: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How often the reconciler checks that every endpoint has a live
    /// worker pair.
    pub reconcile_interval: Duration,
    /// Idle interval of the forwarding workers.
    pub poll_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(200),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Aggregate configuration for a whole fabric.
#[derive(Debug, Clone, Default)]
pub struct FabricConfig {
    pub connection: ConnectionConfig,
    pub service: ServiceConfig,
    pub router: RouterConfig,
}

impl FabricConfig {
    /// Sets every idle/poll interval to `interval`. The reader's channel poll
    /// interval is left alone.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.connection.idle_poll_interval = interval;
        self.service.poll_interval = interval;
        self.router.poll_interval = interval;
        self.router.reconcile_interval = interval;
        self
    }
}
