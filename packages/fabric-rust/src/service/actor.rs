//! Name-addressed actor bound to one connection handler.
//!
//! A [`Service`] turns inbound packages into [`PackageHandler`] calls and
//! turns outgoing calls into packages. Synchronous-looking request/response
//! exchanges are correlated through a [`PendingResponses`] table; the startup
//! configuration handshake is one such exchange.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use aocc_core::{
    status, subjects, DottedStorage, DuplexChannel, Package, PackageType, Payload, RawPackage,
    Value,
};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::config::ServiceConfig;
use super::handler::{NoopHandler, PackageHandler};
use super::pending::PendingResponses;
use crate::error::FabricError;
use crate::lifecycle::{stopped, RunControl, RunState};
use crate::network::{ConnectionConfig, ConnectionHandler, InboundSink};

// ---------------------------------------------------------------------------
// ServiceBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Service`].
pub struct ServiceBuilder {
    name: String,
    conn_in: Arc<dyn DuplexChannel>,
    conn_out: Arc<dyn DuplexChannel>,
    handler: Arc<dyn PackageHandler>,
    config: ServiceConfig,
    connection: Option<ConnectionConfig>,
}

impl ServiceBuilder {
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn PackageHandler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the connection handler settings. By default the handler's
    /// idle interval follows `ServiceConfig::poll_interval`.
    #[must_use]
    pub fn connection_config(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Service> {
        let connection_config = self.connection.unwrap_or_else(|| ConnectionConfig {
            idle_poll_interval: self.config.poll_interval,
            ..ConnectionConfig::default()
        });

        Arc::new_cyclic(|this: &Weak<Service>| {
            let sink = Arc::new(ServiceSink {
                service: Weak::clone(this),
            });
            Service {
                name: self.name,
                connection: ConnectionHandler::new(self.conn_in, self.conn_out, connection_config)
                    .with_sink(sink),
                handler: self.handler,
                pending: PendingResponses::new(),
                control: RunControl::new(),
                config: self.config,
                storage: RwLock::new(DottedStorage::new()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A named actor with request/response dispatch and a config-bootstrap
/// handshake.
///
/// Every inbound package is dispatched on a new task; dispatch is never
/// serialized against other inbound packages.
pub struct Service {
    name: String,
    connection: ConnectionHandler,
    handler: Arc<dyn PackageHandler>,
    pending: PendingResponses,
    control: RunControl,
    config: ServiceConfig,
    storage: RwLock<DottedStorage>,
}

impl Service {
    /// Starts building a service named `name` that reads from `conn_in` and
    /// writes to `conn_out`.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        conn_in: Arc<dyn DuplexChannel>,
        conn_out: Arc<dyn DuplexChannel>,
    ) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            conn_in,
            conn_out,
            handler: Arc::new(NoopHandler),
            config: ServiceConfig::default(),
            connection: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Starts the connection handler and, if configured, fetches the
    /// service's configuration.
    ///
    /// Calling `start` on a running service is a no-op.
    ///
    /// # Errors
    ///
    /// - [`FabricError::ConfigLoad`] if the config reply is not a 200 map.
    /// - [`FabricError::Timeout`] if no reply arrives within
    ///   `ServiceConfig::config_timeout`.
    /// - [`FabricError::Cancelled`] if the service is stopped meanwhile.
    ///
    /// On any error the service is stopped again.
    pub async fn start(&self) -> Result<(), FabricError> {
        if !self.control.begin() {
            return Ok(());
        }
        self.connection.start();
        debug!(service = %self.name, "service starting");

        if self.config.config_required {
            if let Err(err) = self.load_config().await {
                warn!(service = %self.name, error = %err, "configuration handshake failed");
                self.stop();
                return Err(err);
            }
        }

        self.control.set_running();
        info!(service = %self.name, "service running");
        Ok(())
    }

    /// Stops dispatch and the connection handler. Waiting requests are
    /// cancelled; dispatch tasks already running are not waited on.
    ///
    /// Returns `false` if the service was not running.
    pub fn stop(&self) -> bool {
        if !self.control.stop() {
            return false;
        }
        self.connection.stop();
        info!(service = %self.name, "service stopped");
        true
    }

    /// Waits for the connection handler's loops to exit after [`stop`](Self::stop).
    pub async fn join(&self) {
        self.connection.join().await;
    }

    /// Waits up to `timeout` for in-flight dispatch tasks to finish.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        self.control.wait_for_drain(timeout).await
    }

    /// Queues `package` for sending. Never blocks.
    pub fn send_package(&self, package: Package) -> bool {
        self.connection.send_package(package)
    }

    /// Replies to `request` with a Response of the same subject.
    pub fn respond(&self, request: &Package, status_code: u16, payload: impl Into<Payload>) -> bool {
        let reply = request.reply(&self.name, request.subject(), status_code, payload);
        self.send_package(reply)
    }

    /// Sends a Request and waits for the Response with the same
    /// correlation id. The response is not passed to the handler.
    ///
    /// `timeout: None` waits until the reply arrives or the service stops.
    ///
    /// # Errors
    ///
    /// - [`FabricError::NotRunning`] if the service is not running.
    /// - [`FabricError::Timeout`] if the reply does not arrive in time.
    /// - [`FabricError::Cancelled`] if the service is stopped meanwhile.
    pub async fn request(
        &self,
        recipient: &str,
        subject: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<Package, FabricError> {
        if !self.control.is_running() {
            return Err(FabricError::NotRunning);
        }

        let correlation_id = Uuid::new_v4().simple().to_string();
        let rx = self.pending.register(&correlation_id)?;
        let mut stop = self.control.stop_receiver();

        let request = Package::request(&self.name, recipient, &correlation_id, subject)
            .with_payload(payload);
        debug!(
            service = %self.name,
            recipient = %recipient,
            subject = %subject,
            correlation_id = %correlation_id,
            "sending request"
        );
        self.connection.send_package(request);

        let wait = async {
            let reply = async { rx.await.map_err(|_| FabricError::Cancelled) };
            match timeout {
                Some(after) => match tokio::time::timeout(after, reply).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FabricError::timeout(
                        format!("{subject} request to {recipient}"),
                        after,
                    )),
                },
                None => reply.await,
            }
        };

        let outcome = tokio::select! {
            outcome = wait => outcome,
            () = stopped(&mut stop) => Err(FabricError::Cancelled),
        };
        if outcome.is_err() {
            self.pending.cancel(&correlation_id);
        }
        outcome
    }

    /// Copy of the value at dotted `path` in the loaded configuration.
    #[must_use]
    pub fn config_value(&self, path: &str) -> Option<Value> {
        self.storage.read().get(path).cloned()
    }

    /// Snapshot of the loaded configuration.
    #[must_use]
    pub fn config(&self) -> DottedStorage {
        self.storage.read().clone()
    }

    /// Sets a configuration value locally.
    pub fn set_config_value(&self, path: &str, value: Value) {
        self.storage.write().set(path, value);
    }

    async fn load_config(&self) -> Result<(), FabricError> {
        let recipient = self.config.config_service.clone();
        let response = self
            .request(
                &recipient,
                subjects::GET_CONFIG,
                Payload::Empty,
                self.config.config_timeout,
            )
            .await?;

        let code = response.status_code();
        if code != status::OK {
            return Err(FabricError::ConfigLoad { code });
        }

        let data = match response.into_payload() {
            Payload::Value(Value::Map(map)) => map,
            Payload::Empty | Payload::Value(Value::Null) => BTreeMap::new(),
            Payload::Value(_) | Payload::Package(_) => {
                return Err(FabricError::ConfigLoad { code });
            }
        };
        let applied = self.storage.write().load_data(data);
        debug!(service = %self.name, applied, "configuration received");
        Ok(())
    }

    // ---- dispatch ---------------------------------------------------------

    fn spawn_dispatch(self: Arc<Self>, package: Package) {
        let guard = self.control.in_flight_guard();
        tokio::spawn(async move {
            let _guard = guard;
            self.dispatch(package).await;
        });
    }

    async fn dispatch(&self, package: Package) {
        if package.recipient() != self.name {
            warn!(
                service = %self.name,
                sender = %package.sender(),
                recipient = %package.recipient(),
                subject = %package.subject(),
                "package delivered to the wrong recipient"
            );
            let reply = package.reply(
                &self.name,
                subjects::WRONG_RECIPIENT,
                status::WRONG_RECIPIENT,
                package.clone(),
            );
            self.send_package(reply);
            return;
        }

        match package.package_type() {
            PackageType::Request => self.handler.on_request(self, package).await,
            PackageType::Response => self.dispatch_response(package).await,
        }
    }

    async fn dispatch_response(&self, package: Package) {
        match package.subject() {
            subjects::STOP => {
                info!(service = %self.name, sender = %package.sender(), "stop requested");
                self.stop();
                self.handler.on_response(self, package).await;
            }
            subjects::GET_CONFIG => self.pending.deliver(package),
            _ => {
                let Err(package) = self.pending.deliver_if_awaited(package) else {
                    return;
                };
                if package.subject() == subjects::DUMMY {
                    trace!(service = %self.name, "dummy response swallowed");
                } else {
                    self.handler.on_response(self, package).await;
                }
            }
        }
    }

    /// Answers a frame whose type tag is invalid. The recipient is checked
    /// first, as for well-typed packages.
    fn reject(&self, raw: RawPackage) {
        let (subject, code) = if raw.recipient == self.name {
            warn!(
                service = %self.name,
                sender = %raw.sender,
                package_type = %raw.package_type,
                "unknown package type"
            );
            (subjects::UNKNOWN_PACKAGE_TYPE, status::UNKNOWN_PACKAGE_TYPE)
        } else {
            warn!(
                service = %self.name,
                sender = %raw.sender,
                recipient = %raw.recipient,
                package_type = %raw.package_type,
                "untyped frame delivered to the wrong recipient"
            );
            (subjects::WRONG_RECIPIENT, status::WRONG_RECIPIENT)
        };
        let reply = Package::response(
            &self.name,
            raw.sender.clone(),
            raw.correlation_id.clone(),
            subject,
        )
        .with_status(code)
        .with_payload(raw.to_value());
        self.send_package(reply);
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Bridges the connection handler's dispatch loop into the service.
struct ServiceSink {
    service: Weak<Service>,
}

impl InboundSink for ServiceSink {
    fn on_package(&self, package: Package) {
        if let Some(service) = self.service.upgrade() {
            service.spawn_dispatch(package);
        }
    }

    fn on_rejected(&self, raw: RawPackage) {
        if let Some(service) = self.service.upgrade() {
            service.reject(raw);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use aocc_core::{pipe, PipeEnd};

    use super::*;
    use crate::service::domain::ConfigService;
    use crate::service::CONFIG_SERVICE_NAME;
    use crate::test_support::{
        channel_pair, drain, fast_fabric, no_config_service, wait_until, PongHandler,
        RecordingHandler,
    };

    const WAIT: Duration = Duration::from_secs(2);

    /// Service `name` wired to a raw pipe end the test drives by hand.
    async fn service_with_peer(
        name: &str,
        handler: Arc<dyn PackageHandler>,
    ) -> (Arc<Service>, PipeEnd) {
        let (ours, peer) = channel_pair();
        let service = Service::builder(name, Arc::clone(&ours), ours)
            .handler(handler)
            .config(no_config_service())
            .build();
        service.start().await.unwrap();
        (service, peer)
    }

    async fn received(peer: &PipeEnd, count: usize) -> Vec<Package> {
        let mut got = Vec::new();
        wait_until(WAIT, || {
            got.extend(drain(peer));
            got.len() >= count
        })
        .await;
        got
    }

    #[tokio::test]
    async fn ping_pong_between_two_services() {
        let (a_end, b_end) = pipe();
        let recorder = Arc::new(RecordingHandler::default());

        let a = Service::builder("A", Arc::new(a_end.clone()), Arc::new(a_end))
            .handler(Arc::clone(&recorder) as _)
            .config(no_config_service())
            .build();
        let b = Service::builder("B", Arc::new(b_end.clone()), Arc::new(b_end))
            .handler(Arc::new(PongHandler))
            .config(no_config_service())
            .build();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let ping = Package::request("A", "B", "ping-1", "ping").with_payload("ping");
        assert!(a.send_package(ping));

        assert!(wait_until(WAIT, || recorder.responses.lock().len() == 1).await);
        let pong = recorder.responses.lock()[0].clone();
        assert_eq!(pong.sender(), "B");
        assert_eq!(pong.recipient(), "A");
        assert_eq!(pong.correlation_id(), "ping-1");
        assert_eq!(pong.subject(), "ping");
        assert_eq!(pong.status_code(), 200);
        assert_eq!(pong.payload().as_value(), Some(&Value::from("pong")));
        assert!(recorder.requests.lock().is_empty());

        a.stop();
        b.stop();
    }

    #[tokio::test]
    async fn request_waits_for_matching_response() {
        let (a_end, b_end) = pipe();
        let recorder = Arc::new(RecordingHandler::default());
        let a = Service::builder("A", Arc::new(a_end.clone()), Arc::new(a_end))
            .handler(Arc::clone(&recorder) as _)
            .config(no_config_service())
            .build();
        let b = Service::builder("B", Arc::new(b_end.clone()), Arc::new(b_end))
            .handler(Arc::new(PongHandler))
            .config(no_config_service())
            .build();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let reply = a
            .request("B", "ping", "ping", Some(WAIT))
            .await
            .unwrap();
        assert_eq!(reply.payload().as_value(), Some(&Value::from("pong")));
        assert_eq!(reply.correlation_id().len(), 32);

        // Claimed by the caller, so the handler never sees it.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(recorder.responses.lock().is_empty());

        a.stop();
        b.stop();
    }

    #[tokio::test]
    async fn wrong_recipient_answered_once_with_500() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        let stray = Package::request("X", "Z", "stray-1", "ping").with_payload("hi");
        peer.send(stray.clone()).unwrap();

        let replies = received(&peer, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let replies: Vec<Package> = replies.into_iter().chain(drain(&peer)).collect();

        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert!(reply.is_response());
        assert_eq!(reply.subject(), "wrong_receipent");
        assert_eq!(reply.status_code(), 500);
        assert_eq!(reply.sender(), "A");
        assert_eq!(reply.recipient(), "X");
        assert_eq!(reply.correlation_id(), "stray-1");
        assert_eq!(reply.payload().as_package(), Some(&stray));

        assert!(recorder.requests.lock().is_empty());
        assert!(recorder.responses.lock().is_empty());
        service.stop();
    }

    #[tokio::test]
    async fn unknown_package_type_answered_once_with_501() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        let mut raw = RawPackage::from(Package::request("X", "A", "odd-1", "ping"));
        raw.package_type = "broadcast".to_string();
        peer.send_raw(raw).unwrap();

        let replies = received(&peer, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let replies: Vec<Package> = replies.into_iter().chain(drain(&peer)).collect();

        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.subject(), "unknown_package_type");
        assert_eq!(reply.status_code(), 501);
        assert_eq!(reply.recipient(), "X");
        assert_eq!(reply.correlation_id(), "odd-1");
        let echoed = reply.payload().as_value().and_then(Value::as_map).unwrap();
        assert_eq!(echoed["type"], Value::from("broadcast"));

        assert!(recorder.requests.lock().is_empty());
        service.stop();
    }

    #[tokio::test]
    async fn misaddressed_untyped_frame_answered_with_500() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        let mut raw = RawPackage::from(Package::request("X", "Z", "odd-2", "ping"));
        raw.package_type = "broadcast".to_string();
        peer.send_raw(raw).unwrap();

        let replies = received(&peer, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let replies: Vec<Package> = replies.into_iter().chain(drain(&peer)).collect();

        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.subject(), "wrong_receipent");
        assert_eq!(reply.status_code(), 500);
        assert_eq!(reply.recipient(), "X");
        assert_eq!(reply.correlation_id(), "odd-2");
        let echoed = reply.payload().as_value().and_then(Value::as_map).unwrap();
        assert_eq!(echoed["recipient"], Value::from("Z"));
        assert_eq!(echoed["type"], Value::from("broadcast"));

        assert!(recorder.requests.lock().is_empty());
        service.stop();
    }

    #[tokio::test]
    async fn stop_subject_stops_service() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        peer.send(Package::response("Admin", "A", "s-1", "stop")).unwrap();

        assert!(wait_until(WAIT, || service.state() == RunState::Stopped).await);
        assert!(!service.is_running());
        assert!(wait_until(WAIT, || recorder.responses.lock().len() == 1).await);
    }

    #[tokio::test]
    async fn dummy_responses_are_swallowed() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        peer.send(Package::response("B", "A", "d-1", "dummy")).unwrap();
        peer.send(Package::response("B", "A", "r-1", "report")).unwrap();

        assert!(wait_until(WAIT, || recorder.responses.lock().len() == 1).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let responses = recorder.responses.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].subject(), "report");
        drop(responses);
        service.stop();
    }

    #[tokio::test]
    async fn requests_reach_handler() {
        let recorder = Arc::new(RecordingHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&recorder) as _).await;

        peer.send(Package::request("B", "A", "q-1", "lookup")).unwrap();
        assert!(wait_until(WAIT, || recorder.requests.lock().len() == 1).await);
        assert_eq!(recorder.requests.lock()[0].subject(), "lookup");
        // No implicit reply.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(drain(&peer).is_empty());
        service.stop();
    }

    #[tokio::test]
    async fn config_handshake_loads_configuration() {
        let (a_end, cfg_end) = pipe();
        let mut logging = BTreeMap::new();
        logging.insert("level".to_string(), Value::from("debug"));
        let mut data = BTreeMap::new();
        data.insert("logging".to_string(), Value::Map(logging));

        let config_service = Service::builder(
            CONFIG_SERVICE_NAME,
            Arc::new(cfg_end.clone()),
            Arc::new(cfg_end),
        )
        .handler(Arc::new(ConfigService::new(data)))
        .config(no_config_service())
        .build();
        config_service.start().await.unwrap();

        let a = Service::builder("A", Arc::new(a_end.clone()), Arc::new(a_end))
            .config(fast_fabric().service)
            .build();
        a.start().await.unwrap();

        assert_eq!(a.state(), RunState::Running);
        assert_eq!(a.config_value("logging.level"), Some(Value::from("debug")));
        assert!(a.config().loaded());

        a.stop();
        config_service.stop();
    }

    #[tokio::test]
    async fn config_handshake_rejects_non_200() {
        let (ours, peer) = channel_pair();
        let a = Service::builder("A", Arc::clone(&ours), ours)
            .config(fast_fabric().service)
            .build();

        let responder = tokio::spawn(async move {
            let mut got = Vec::new();
            wait_until(WAIT, || {
                got.extend(drain(&peer));
                !got.is_empty()
            })
            .await;
            let request = got.remove(0);
            assert_eq!(request.subject(), "get_config");
            assert_eq!(request.recipient(), "ConfigService");
            peer.send(request.reply("ConfigService", "get_config", 404, Payload::Empty))
                .unwrap();
        });

        let err = a.start().await.unwrap_err();
        assert!(matches!(err, FabricError::ConfigLoad { code: 404 }));
        assert!(!a.is_running());
        responder.await.unwrap();
    }

    /// Answers the first `get_config` request seen on `peer`.
    fn answer_config(peer: PipeEnd, code: u16, payload: Payload) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut got = Vec::new();
            wait_until(WAIT, || {
                got.extend(drain(&peer));
                !got.is_empty()
            })
            .await;
            let request = got.remove(0);
            peer.send(request.reply(CONFIG_SERVICE_NAME, "get_config", code, payload))
                .unwrap();
        })
    }

    #[tokio::test]
    async fn config_handshake_accepts_empty_payload() {
        for payload in [Payload::Empty, Payload::Value(Value::Null)] {
            let (ours, peer) = channel_pair();
            let a = Service::builder("A", Arc::clone(&ours), ours)
                .config(fast_fabric().service)
                .build();
            let responder = answer_config(peer, 200, payload);

            a.start().await.unwrap();
            assert_eq!(a.state(), RunState::Running);
            assert!(a.config().loaded());
            assert!(a.config().data().is_empty());

            responder.await.unwrap();
            a.stop();
        }
    }

    #[tokio::test]
    async fn config_handshake_rejects_non_map_payload() {
        let (ours, peer) = channel_pair();
        let a = Service::builder("A", Arc::clone(&ours), ours)
            .config(fast_fabric().service)
            .build();
        let responder = answer_config(peer, 200, Payload::from("not a map"));

        let err = a.start().await.unwrap_err();
        assert!(matches!(err, FabricError::ConfigLoad { code: 200 }));
        assert_eq!(a.state(), RunState::Stopped);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn config_handshake_times_out() {
        let (ours, _peer) = channel_pair();
        let a = Service::builder("A", Arc::clone(&ours), ours)
            .config(ServiceConfig {
                config_timeout: Some(Duration::from_millis(50)),
                ..fast_fabric().service
            })
            .build();

        let err = a.start().await.unwrap_err();
        assert!(matches!(err, FabricError::Timeout { .. }));
        assert_eq!(a.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn stop_cancels_unbounded_request() {
        let (service, _peer) = service_with_peer("A", Arc::new(NoopHandler)).await;

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.request("Nobody", "ping", Payload::Empty, None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.stop();

        let outcome = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(FabricError::Cancelled)));
    }

    #[tokio::test]
    async fn request_on_stopped_service_fails() {
        let (ours, _peer) = channel_pair();
        let service = Service::builder("A", Arc::clone(&ours), ours)
            .config(no_config_service())
            .build();
        assert!(matches!(
            service.request("B", "ping", Payload::Empty, None).await,
            Err(FabricError::NotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inbound_packages_dispatch_concurrently() {
        let slow = Arc::new(crate::test_support::GateHandler::default());
        let (service, peer) = service_with_peer("A", Arc::clone(&slow) as _).await;

        peer.send(Package::request("B", "A", "1", "hold")).unwrap();
        peer.send(Package::request("B", "A", "2", "hold")).unwrap();

        // Both handlers are parked on the gate at the same time.
        assert!(wait_until(WAIT, || slow.entered() == 2).await);
        slow.release();
        assert!(service.wait_for_drain(WAIT).await);
        service.stop();
    }
}
