//! Run/stop control shared by connection handlers, services and router
//! worker pairs.
//!
//! Uses `ArcSwap` for lock-free state transitions, a `watch` channel as the
//! stop signal, and an atomic counter with RAII guards for in-flight work.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Lifecycle state of a fabric component.
///
/// State machine: Created -> Starting -> Running -> Stopped, and back to
/// Starting on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, never started.
    Created,
    /// `begin()` was called; startup work (such as the config handshake) is
    /// still in progress.
    Starting,
    /// Fully operational.
    Running,
    /// `stop()` was called.
    Stopped,
}

/// Controls the running flag of one component.
///
/// Every long-lived loop takes a receiver from [`stop_receiver`] and selects
/// on [`stopped`] next to its own wait, so `stop()` interrupts any wait
/// instead of being observed only at the next poll.
///
/// [`stop_receiver`]: RunControl::stop_receiver
#[derive(Debug)]
pub struct RunControl {
    stop_signal: Mutex<watch::Sender<bool>>,
    running: AtomicBool,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<RunState>,
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self {
            stop_signal: Mutex::new(tx),
            running: AtomicBool::new(false),
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(RunState::Created),
        }
    }

    /// Sets the running flag and moves to `Starting`.
    ///
    /// Installs a fresh stop signal so receivers taken from an earlier run
    /// stay stopped. Returns `false` if already running.
    pub fn begin(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        let (tx, _rx) = watch::channel(false);
        *self.stop_signal.lock() = tx;
        self.state.store(Arc::new(RunState::Starting));
        true
    }

    /// Moves from `Starting` to `Running`.
    pub fn set_running(&self) {
        if self.is_running() {
            self.state.store(Arc::new(RunState::Running));
        }
    }

    /// Clears the running flag and signals every receiver.
    ///
    /// Returns `false` if the component was not running.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.state.store(Arc::new(RunState::Stopped));
        // send_replace stores the flag even when no receiver is alive yet
        self.stop_signal.lock().send_replace(true);
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        **self.state.load()
    }

    /// Returns a receiver for the current run's stop signal.
    ///
    /// A receiver taken while not running already reads as stopped.
    #[must_use]
    pub fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_signal.lock().subscribe()
    }

    /// Creates an RAII guard that tracks one in-flight dispatch.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight dispatches to complete, up to `timeout`.
    ///
    /// `stop()` never waits on its own; callers that need a barrier call
    /// this afterwards. Returns `false` if the timeout expired.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the stop signal behind `rx` is raised or its sender is gone.
pub async fn stopped(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the run this receiver belonged to is over.
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_created() {
        let control = RunControl::new();
        assert_eq!(control.state(), RunState::Created);
        assert!(!control.is_running());
        assert_eq!(control.in_flight_count(), 0);
    }

    #[test]
    fn state_transitions_created_starting_running_stopped() {
        let control = RunControl::new();

        assert!(control.begin());
        assert_eq!(control.state(), RunState::Starting);
        assert!(!control.begin());

        control.set_running();
        assert_eq!(control.state(), RunState::Running);

        assert!(control.stop());
        assert_eq!(control.state(), RunState::Stopped);
        assert!(!control.stop());

        // set_running after stop does not resurrect the component.
        control.set_running();
        assert_eq!(control.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn stop_wakes_receivers() {
        let control = RunControl::new();
        control.begin();
        let mut rx = control.stop_receiver();
        assert!(!*rx.borrow());

        let waiter = tokio::spawn(async move { stopped(&mut rx).await });
        control.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn receiver_taken_while_idle_is_already_stopped() {
        let control = RunControl::new();
        let mut rx = control.stop_receiver();
        tokio::time::timeout(Duration::from_millis(100), stopped(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restart_leaves_old_receivers_stopped() {
        let control = RunControl::new();
        control.begin();
        let mut old = control.stop_receiver();
        control.stop();
        control.begin();

        tokio::time::timeout(Duration::from_millis(100), stopped(&mut old))
            .await
            .unwrap();
        assert!(!*control.stop_receiver().borrow());
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let control = RunControl::new();

        let guard1 = control.in_flight_guard();
        let guard2 = control.in_flight_guard();
        assert_eq!(control.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(control.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(control.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_work() {
        let control = RunControl::new();
        let guard = control.in_flight_guard();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(control.wait_for_drain(Duration::from_secs(2)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let control = RunControl::new();
        let _guard = control.in_flight_guard();
        assert!(!control.wait_for_drain(Duration::from_millis(50)).await);
    }
}
