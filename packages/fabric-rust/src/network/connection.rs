//! Connection handler: adapts one duplex channel into an inbound and an
//! outbound queue, with optional callback dispatch of inbound packages.
//!
//! Up to three long-lived tasks run per handler: a reader that moves frames
//! from the channel to the inbound queue, a dispatcher that hands inbound
//! packages to an [`InboundSink`], and a writer that drains the outbound queue
//! onto the channel. All three live exactly as long as the running flag.

use std::sync::Arc;

use aocc_core::{ChannelError, DuplexChannel, Package, RawPackage};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::config::ConnectionConfig;
use crate::lifecycle::{stopped, RunControl, RunState};
use crate::mailbox::{Direction, MessageBox};

// ---------------------------------------------------------------------------
// InboundSink
// ---------------------------------------------------------------------------

/// Receives packages popped by a handler's dispatch loop.
///
/// Called from the dispatch task, one package at a time; implementations
/// should hand long work off to their own tasks.
pub trait InboundSink: Send + Sync + 'static {
    fn on_package(&self, package: Package);

    /// Called by the reader for a frame whose type tag is not accepted.
    fn on_rejected(&self, raw: RawPackage) {
        warn!(
            sender = %raw.sender,
            package_type = %raw.package_type,
            "dropping frame with unknown package type"
        );
    }
}

// ---------------------------------------------------------------------------
// ConnectionHandler
// ---------------------------------------------------------------------------

/// Turns one inbound and one outbound channel endpoint into two independent
/// FIFO queues.
pub struct ConnectionHandler {
    conn_in: Arc<dyn DuplexChannel>,
    conn_out: Arc<dyn DuplexChannel>,
    sink: Option<Arc<dyn InboundSink>>,
    inbound: Arc<MessageBox>,
    outbound: Arc<MessageBox>,
    control: Arc<RunControl>,
    config: ConnectionConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionHandler {
    /// Creates a handler reading from `conn_in` and writing to `conn_out`.
    #[must_use]
    pub fn new(
        conn_in: Arc<dyn DuplexChannel>,
        conn_out: Arc<dyn DuplexChannel>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            conn_in,
            conn_out,
            sink: None,
            inbound: Arc::new(MessageBox::new("inbound", Direction::Inbound)),
            outbound: Arc::new(MessageBox::new("outbound", Direction::Outbound)),
            control: Arc::new(RunControl::new()),
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Creates a handler that reads and writes the same endpoint.
    #[must_use]
    pub fn duplex(conn: Arc<dyn DuplexChannel>, config: ConnectionConfig) -> Self {
        Self::new(Arc::clone(&conn), conn, config)
    }

    /// Installs the dispatch callback. Without one, inbound packages stay
    /// queued for [`get_package`](Self::get_package).
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn InboundSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Spawns the reader, writer and (with a sink) dispatch loops.
    ///
    /// Returns `false` if the handler is already running.
    pub fn start(&self) -> bool {
        if !self.control.begin() {
            return false;
        }

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());

        tasks.push(tokio::spawn(read_loop(
            Arc::clone(&self.conn_in),
            Arc::clone(&self.inbound),
            self.sink.clone(),
            self.control.stop_receiver(),
            self.config.clone(),
        )));

        if let Some(sink) = &self.sink {
            tasks.push(tokio::spawn(dispatch_loop(
                Arc::clone(&self.inbound),
                Arc::clone(sink),
                self.control.stop_receiver(),
                self.config.clone(),
            )));
        }

        tasks.push(tokio::spawn(write_loop(
            Arc::clone(&self.conn_out),
            Arc::clone(&self.outbound),
            self.control.stop_receiver(),
            self.config.clone(),
        )));

        self.control.set_running();
        info!(dispatch = self.sink.is_some(), "connection handler started");
        true
    }

    /// Clears the running flag. Loops exit at their next wait; this does not
    /// wait for them. Returns `false` if the handler was not running.
    pub fn stop(&self) -> bool {
        let stopped = self.control.stop();
        if stopped {
            info!("connection handler stopped");
        }
        stopped
    }

    /// Waits for every loop spawned by [`start`](Self::start) to exit.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Queues `package` for the writer. Never blocks.
    pub fn send_package(&self, package: Package) -> bool {
        self.outbound.add_package(package)
    }

    /// Takes one inbound package, if any. Never blocks.
    pub fn get_package(&self) -> Option<Package> {
        self.inbound.try_get_package()
    }

    /// Number of packages waiting to be written.
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("state", &self.state())
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("dispatch", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn read_loop(
    conn_in: Arc<dyn DuplexChannel>,
    inbound: Arc<MessageBox>,
    sink: Option<Arc<dyn InboundSink>>,
    mut stop: watch::Receiver<bool>,
    config: ConnectionConfig,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        if conn_in.poll() {
            match conn_in.receive() {
                Ok(package) => {
                    trace!(
                        sender = %package.sender(),
                        subject = %package.subject(),
                        "package received"
                    );
                    inbound.add_package(package);
                }
                Err(ChannelError::Rejected(raw)) => match &sink {
                    Some(sink) => sink.on_rejected(*raw),
                    None => warn!(
                        sender = %raw.sender,
                        package_type = %raw.package_type,
                        "dropping frame with unknown package type"
                    ),
                },
                Err(ChannelError::Empty) => {}
                Err(ChannelError::Closed) => {
                    debug!("inbound channel closed, reader exiting");
                    break;
                }
            }
            tokio::task::yield_now().await;
            continue;
        }

        if config.read_poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                () = tokio::time::sleep(config.read_poll_interval) => {}
                () = stopped(&mut stop) => break,
            }
        }
    }
}

async fn dispatch_loop(
    inbound: Arc<MessageBox>,
    sink: Arc<dyn InboundSink>,
    mut stop: watch::Receiver<bool>,
    config: ConnectionConfig,
) {
    loop {
        while !*stop.borrow() {
            let Some(package) = inbound.try_get_package() else {
                break;
            };
            sink.on_package(package);
        }

        // An empty queue only suspends dispatch until the next arrival.
        tokio::select! {
            () = inbound.wait_arrival(config.idle_poll_interval) => {}
            () = stopped(&mut stop) => break,
        }
    }
}

async fn write_loop(
    conn_out: Arc<dyn DuplexChannel>,
    outbound: Arc<MessageBox>,
    mut stop: watch::Receiver<bool>,
    config: ConnectionConfig,
) {
    loop {
        while let Some(package) = outbound.try_get_package() {
            if let Err(err) = conn_out.send(package) {
                warn!(error = %err, "dropping outbound package");
            }
        }

        tokio::select! {
            () = outbound.wait_arrival(config.idle_poll_interval) => {}
            () = stopped(&mut stop) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
