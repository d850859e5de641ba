//! Shared helpers for the inline test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aocc_core::{pipe, status, DuplexChannel, Package, PipeEnd, RawPackage, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::network::{ConnectionConfig, InboundSink};
use crate::service::{FabricConfig, PackageHandler, Service, ServiceConfig};

/// Polls `cond` every few milliseconds until it holds or `timeout` elapses.
pub(crate) async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub(crate) fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        idle_poll_interval: Duration::from_millis(10),
        read_poll_interval: Duration::from_millis(1),
    }
}

pub(crate) fn fast_fabric() -> FabricConfig {
    FabricConfig::default().with_poll_interval(Duration::from_millis(10))
}

pub(crate) fn no_config_service() -> ServiceConfig {
    ServiceConfig {
        config_required: false,
        ..fast_fabric().service
    }
}

/// Both ends of a fresh pipe, the first already erased to a trait object.
pub(crate) fn channel_pair() -> (Arc<dyn DuplexChannel>, PipeEnd) {
    let (ours, theirs) = pipe();
    (Arc::new(ours), theirs)
}

/// Drains whatever `end` has received so far.
pub(crate) fn drain(end: &PipeEnd) -> Vec<Package> {
    let mut out = Vec::new();
    while end.poll() {
        if let Ok(package) = end.receive() {
            out.push(package);
        }
    }
    out
}

/// Sink that records everything the dispatch loop hands it.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub packages: Mutex<Vec<Package>>,
    pub rejected: Mutex<Vec<RawPackage>>,
}

impl InboundSink for RecordingSink {
    fn on_package(&self, package: Package) {
        self.packages.lock().push(package);
    }

    fn on_rejected(&self, raw: RawPackage) {
        self.rejected.lock().push(raw);
    }
}

/// Handler that records every request and unclaimed response it sees.
#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    pub requests: Mutex<Vec<Package>>,
    pub responses: Mutex<Vec<Package>>,
}

#[async_trait]
impl PackageHandler for RecordingHandler {
    async fn on_request(&self, _service: &Service, package: Package) {
        self.requests.lock().push(package);
    }

    async fn on_response(&self, _service: &Service, package: Package) {
        self.responses.lock().push(package);
    }
}

/// Answers every request with `200` / `"pong"` under the request's subject.
#[derive(Debug, Default)]
pub(crate) struct PongHandler;

#[async_trait]
impl PackageHandler for PongHandler {
    async fn on_request(&self, service: &Service, package: Package) {
        service.respond(&package, status::OK, Value::from("pong"));
    }
}

/// Parks every request until [`GateHandler::release`] is called.
#[derive(Debug)]
pub(crate) struct GateHandler {
    entered: AtomicUsize,
    gate: Semaphore,
}

impl Default for GateHandler {
    fn default() -> Self {
        Self {
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

impl GateHandler {
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.add_permits(1024);
    }
}

#[async_trait]
impl PackageHandler for GateHandler {
    async fn on_request(&self, _service: &Service, _package: Package) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.acquire().await;
    }
}
