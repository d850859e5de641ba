//! Named FIFO mailbox of packages.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aocc_core::Package;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::FabricError;

/// Which way the packages in a mailbox travel, relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// A single named FIFO queue of packages.
///
/// Insertion order is preserved and entries are never deduplicated. The queue
/// lock is held only for one push or pop. Blocking reads wait on a `Notify`
/// that every push signals, so they wake on arrival instead of polling.
#[derive(Debug)]
pub struct MessageBox {
    name: String,
    direction: Direction,
    queue: Mutex<VecDeque<Package>>,
    arrival: Notify,
    closed: AtomicBool,
}

impl MessageBox {
    #[must_use]
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            queue: Mutex::new(VecDeque::new()),
            arrival: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Appends `package` to the tail.
    ///
    /// Returns `false` only if the box has been closed.
    pub fn add_package(&self, package: Package) -> bool {
        if self.is_closed() {
            return false;
        }
        self.queue.lock().push_back(package);
        self.arrival.notify_one();
        true
    }

    /// Puts `package` back at the head, ahead of everything queued.
    ///
    /// Returns `false` only if the box has been closed.
    pub(crate) fn requeue(&self, package: Package) -> bool {
        if self.is_closed() {
            return false;
        }
        self.queue.lock().push_front(package);
        self.arrival.notify_one();
        true
    }

    /// Appends every entry that converts into a [`Package`], silently
    /// skipping the rest. Returns how many were appended.
    pub fn add_packages<I>(&self, items: I) -> usize
    where
        I: IntoIterator,
        I::Item: TryInto<Package>,
    {
        items
            .into_iter()
            .filter_map(|item| item.try_into().ok())
            .map(|package| self.add_package(package))
            .filter(|added| *added)
            .count()
    }

    /// Pops the head without waiting.
    pub fn try_get_package(&self) -> Option<Package> {
        self.queue.lock().pop_front()
    }

    /// Pops the head.
    ///
    /// With `block`, waits until a package arrives.
    ///
    /// # Errors
    ///
    /// - [`FabricError::BoxEmpty`] if `block` is false and the box is empty.
    /// - [`FabricError::BoxNotFound`] if the box is (or becomes) closed while
    ///   empty.
    pub async fn get_package(&self, block: bool) -> Result<Package, FabricError> {
        loop {
            let notified = self.arrival.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(package) = self.try_get_package() {
                return Ok(package);
            }
            if self.is_closed() {
                return Err(FabricError::BoxNotFound {
                    name: self.name.clone(),
                });
            }
            if !block {
                return Err(FabricError::BoxEmpty {
                    name: self.name.clone(),
                });
            }
            trace!(mailbox = %self.name, "waiting for package");
            notified.await;
        }
    }

    /// Blocking [`get_package`](Self::get_package) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Timeout`] if nothing arrives in time, otherwise
    /// as [`get_package`](Self::get_package).
    pub async fn get_package_timeout(&self, timeout: Duration) -> Result<Package, FabricError> {
        tokio::time::timeout(timeout, self.get_package(true))
            .await
            .map_err(|_| FabricError::timeout(format!("get_package({})", self.name), timeout))?
    }

    /// Atomically drains the box, returning its entries in order.
    pub fn get_all_packages(&self) -> Vec<Package> {
        self.queue.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Rejects further pushes and wakes every blocked reader.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.arrival.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits until a push is signalled or `max` elapses, whichever is first.
    pub(crate) async fn wait_arrival(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.arrival.notified()).await;
    }
}
