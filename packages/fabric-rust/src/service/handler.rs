use async_trait::async_trait;

use aocc_core::Package;

use super::actor::Service;

// ---------------------------------------------------------------------------
// PackageHandler trait
// ---------------------------------------------------------------------------

/// Application behavior plugged into a [`Service`].
///
/// Each inbound package is dispatched on its own task, so both methods may
/// run concurrently with themselves and each other. No reply is sent
/// implicitly; a handler that wants to answer a request sends the reply
/// through `service`.
#[async_trait]
pub trait PackageHandler: Send + Sync + 'static {
    /// Called for every Request addressed to the service.
    async fn on_request(&self, _service: &Service, _package: Package) {}

    /// Called for Responses that no synchronous caller is waiting on.
    async fn on_response(&self, _service: &Service, _package: Package) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl PackageHandler for NoopHandler {}
