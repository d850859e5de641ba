//! Hub that forwards packages between registered endpoints by recipient name.
//!
//! Every endpoint is a pair of channels plus an outbound [`MessageBox`]. Each
//! endpoint gets a forwarding worker pair:
//!
//! - the **inbound** worker drains the endpoint's `conn_in` and files every
//!   package into the outbound box of the endpoint named by its recipient;
//! - the **outbound** worker drains that box into the endpoint's `conn_out`.
//!
//! A reconciliation loop restarts pairs that are missing or have finished and
//! retires pairs whose endpoint was deleted or replaced.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Weak};
use std::time::Duration;

use aocc_core::{status, subjects, ChannelError, DuplexChannel, Package};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::config::RouterConfig;
use super::worker::Worker;
use crate::error::FabricError;
use crate::lifecycle::{stopped, RunControl, RunState};
use crate::mailbox::{Direction, MessageBox};

/// Sender name on replies the router generates itself.
pub const ROUTER_NAME: &str = "RouterService";

type Endpoints = Arc<RwLock<HashMap<String, Arc<Endpoint>>>>;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

struct Endpoint {
    name: String,
    conn_in: Arc<dyn DuplexChannel>,
    conn_out: Arc<dyn DuplexChannel>,
    outbound: MessageBox,
}

// ---------------------------------------------------------------------------
// WorkerPair
// ---------------------------------------------------------------------------

struct WorkerPair {
    endpoint: Arc<Endpoint>,
    control: RunControl,
    inbound: Worker<()>,
    outbound: Worker<()>,
}

impl WorkerPair {
    fn spawn(endpoint: Arc<Endpoint>, endpoints: Endpoints, poll_interval: Duration) -> Self {
        let control = RunControl::new();
        control.begin();
        control.set_running();

        let inbound = Worker::start(
            format!("router-in-{}", endpoint.name),
            forward_inbound,
            (
                Arc::clone(&endpoint),
                endpoints,
                control.stop_receiver(),
                poll_interval,
            ),
        );
        let outbound = Worker::start(
            format!("router-out-{}", endpoint.name),
            forward_outbound,
            (Arc::clone(&endpoint), control.stop_receiver(), poll_interval),
        );

        Self {
            endpoint,
            control,
            inbound,
            outbound,
        }
    }

    fn is_alive(&self) -> bool {
        !self.inbound.finished() && !self.outbound.finished()
    }

    fn stop(&self) {
        self.control.stop();
    }
}

// ---------------------------------------------------------------------------
// RouterService
// ---------------------------------------------------------------------------

/// Star-topology hub connecting any number of named endpoints.
///
/// Endpoints are added and removed at any time; forwarding for a new
/// endpoint begins at the next reconciliation, which `add_connection_pair`
/// triggers immediately on a running router.
pub struct RouterService {
    config: RouterConfig,
    endpoints: Endpoints,
    pairs: Mutex<HashMap<String, WorkerPair>>,
    control: RunControl,
    kick: Arc<Notify>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl RouterService {
    #[must_use]
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            pairs: Mutex::new(HashMap::new()),
            control: RunControl::new(),
            kick: Arc::new(Notify::new()),
            reconciler: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Registers endpoint `name`. Packages addressed to `name` are sent on
    /// `conn_out`; packages arriving on `conn_in` are routed by recipient.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::DuplicateEndpoint`] if `name` is already
    /// registered. The existing endpoint is left untouched.
    pub fn add_connection_pair(
        &self,
        name: impl Into<String>,
        conn_in: Arc<dyn DuplexChannel>,
        conn_out: Arc<dyn DuplexChannel>,
    ) -> Result<(), FabricError> {
        let name = name.into();
        {
            let mut endpoints = self.endpoints.write();
            if endpoints.contains_key(&name) {
                return Err(FabricError::DuplicateEndpoint(name));
            }
            let endpoint = Endpoint {
                outbound: MessageBox::new(name.clone(), Direction::Outbound),
                name: name.clone(),
                conn_in,
                conn_out,
            };
            endpoints.insert(name.clone(), Arc::new(endpoint));
        }
        info!(endpoint = %name, "router endpoint added");
        self.kick.notify_one();
        Ok(())
    }

    /// Removes endpoint `name` and stops its worker pair. Packages still
    /// queued for it are dropped. Returns `false` if `name` was not
    /// registered.
    pub fn del_connection_pair(&self, name: &str) -> bool {
        let Some(endpoint) = self.endpoints.write().remove(name) else {
            return false;
        };
        endpoint.outbound.close();
        if let Some(pair) = self.pairs.lock().remove(name) {
            pair.stop();
        }
        info!(endpoint = %name, dropped = endpoint.outbound.len(), "router endpoint removed");
        true
    }

    /// Names of all registered endpoints, sorted.
    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn has_endpoint(&self, name: &str) -> bool {
        self.endpoints.read().contains_key(name)
    }

    /// Whether `name` currently has a live forwarding worker pair.
    #[must_use]
    pub fn is_forwarding(&self, name: &str) -> bool {
        self.pairs.lock().get(name).is_some_and(WorkerPair::is_alive)
    }

    /// Starts the reconciliation loop. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.control.begin() {
            return false;
        }
        let handle = tokio::spawn(reconcile_loop(
            Arc::downgrade(self),
            Arc::clone(&self.kick),
            self.config.reconcile_interval,
            self.control.stop_receiver(),
        ));
        *self.reconciler.lock() = Some(handle);
        self.control.set_running();
        info!(endpoints = self.endpoints.read().len(), "router running");
        true
    }

    /// Stops the reconciliation loop and every worker pair. Endpoints stay
    /// registered; a later `start` resumes forwarding for them.
    pub fn stop(&self) -> bool {
        // Flag drops before the pairs lock; reconcile checks it under that lock.
        if !self.control.stop() {
            return false;
        }
        for (_, pair) in self.pairs.lock().drain() {
            pair.stop();
        }
        info!("router stopped");
        true
    }

    /// Waits for the reconciliation loop to exit after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = self.reconciler.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Brings the worker pairs in line with the registry. Returns the number
    /// of pairs (re)started; always 0 on a router that is not running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconcile(&self) -> usize {
        let mut pairs = self.pairs.lock();
        if !self.control.is_running() {
            return 0;
        }
        let endpoints: Vec<Arc<Endpoint>> = self.endpoints.read().values().cloned().collect();

        pairs.retain(|name, pair| {
            let current = endpoints
                .iter()
                .any(|endpoint| Arc::ptr_eq(endpoint, &pair.endpoint));
            if !current {
                debug!(endpoint = %name, "retiring worker pair");
                pair.stop();
            }
            current
        });

        let mut started = 0;
        for endpoint in endpoints {
            if pairs.get(&endpoint.name).is_some_and(WorkerPair::is_alive) {
                continue;
            }
            if let Some(old) = pairs.remove(&endpoint.name) {
                let error = old
                    .inbound
                    .error()
                    .or_else(|| old.outbound.error())
                    .unwrap_or_default();
                warn!(endpoint = %endpoint.name, error = %error, "restarting worker pair");
                old.stop();
            } else {
                debug!(endpoint = %endpoint.name, "starting worker pair");
            }
            let name = endpoint.name.clone();
            let pair = WorkerPair::spawn(
                endpoint,
                Arc::clone(&self.endpoints),
                self.config.poll_interval,
            );
            pairs.insert(name, pair);
            started += 1;
        }
        started
    }
}

impl std::fmt::Debug for RouterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterService")
            .field("state", &self.state())
            .field("endpoints", &self.endpoint_names())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn reconcile_loop(
    router: Weak<RouterService>,
    kick: Arc<Notify>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        let Some(router) = router.upgrade() else {
            break;
        };
        let started = router.reconcile();
        if started > 0 {
            trace!(started, "reconciled worker pairs");
        }
        drop(router);

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = kick.notified() => {}
            () = stopped(&mut stop) => break,
        }
    }
    debug!("router reconciler exiting");
}

async fn forward_inbound(
    (endpoint, endpoints, mut stop, poll_interval): (
        Arc<Endpoint>,
        Endpoints,
        watch::Receiver<bool>,
        Duration,
    ),
) -> Result<(), Infallible> {
    while !*stop.borrow() {
        if !endpoint.conn_in.poll() {
            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                () = stopped(&mut stop) => break,
            }
            continue;
        }

        match endpoint.conn_in.receive() {
            Ok(package) => route(&endpoints, &endpoint, package),
            Err(ChannelError::Rejected(raw)) => warn!(
                endpoint = %endpoint.name,
                sender = %raw.sender,
                package_type = %raw.package_type,
                "router dropping frame with unknown package type"
            ),
            Err(ChannelError::Empty) => {}
            Err(ChannelError::Closed) => {
                debug!(endpoint = %endpoint.name, "endpoint inbound channel closed");
                stopped(&mut stop).await;
                break;
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

async fn forward_outbound(
    (endpoint, mut stop, poll_interval): (Arc<Endpoint>, watch::Receiver<bool>, Duration),
) -> Result<(), Infallible> {
    loop {
        while !*stop.borrow() {
            let Some(package) = endpoint.outbound.try_get_package() else {
                break;
            };
            if let Err(err) = endpoint.conn_out.send(package) {
                warn!(endpoint = %endpoint.name, error = %err, "router failed to deliver package");
            }
        }
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            () = endpoint.outbound.wait_arrival(poll_interval) => {}
            () = stopped(&mut stop) => break,
        }
    }
    Ok(())
}

/// Files `package` into the outbound box of its recipient, or answers the
/// sender with `unknown_recipient` over the endpoint it arrived on.
fn route(endpoints: &RwLock<HashMap<String, Arc<Endpoint>>>, arrival: &Endpoint, package: Package) {
    let target = endpoints.read().get(package.recipient()).cloned();
    if let Some(target) = target {
        trace!(
            from = %arrival.name,
            to = %target.name,
            subject = %package.subject(),
            "forwarding package"
        );
        if !target.outbound.add_package(package) {
            warn!(
                from = %arrival.name,
                to = %target.name,
                "dropping package for an endpoint that was just removed"
            );
        }
        return;
    }

    if is_unknown_recipient_reply(&package) {
        warn!(
            endpoint = %arrival.name,
            recipient = %package.recipient(),
            "dropping undeliverable unknown_recipient reply"
        );
        return;
    }

    warn!(
        endpoint = %arrival.name,
        sender = %package.sender(),
        recipient = %package.recipient(),
        "unknown recipient"
    );
    let reply = package.reply(
        ROUTER_NAME,
        subjects::UNKNOWN_RECIPIENT,
        status::UNKNOWN_RECIPIENT,
        package.clone(),
    );
    arrival.outbound.add_package(reply);
}

fn is_unknown_recipient_reply(package: &Package) -> bool {
    package.is_response()
        && package.subject() == subjects::UNKNOWN_RECIPIENT
        && package.status_code() == status::UNKNOWN_RECIPIENT
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
