//! Correlation table matching asynchronous responses to waiting callers.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use aocc_core::Package;

use crate::error::FabricError;

/// Pending-response table keyed by correlation id.
///
/// At most one waiter exists per id. Delivering to a waiter or cancelling it
/// removes the entry; a response nobody waits for is never stored.
#[derive(Debug, Default)]
pub struct PendingResponses {
    waiters: DashMap<String, oneshot::Sender<Package>>,
}

impl PendingResponses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::DuplicateCorrelationId`] if another caller is
    /// already waiting on the same id.
    pub fn register(&self, correlation_id: &str) -> Result<oneshot::Receiver<Package>, FabricError> {
        match self.waiters.entry(correlation_id.to_owned()) {
            Entry::Occupied(_) => Err(FabricError::DuplicateCorrelationId(
                correlation_id.to_owned(),
            )),
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Hands `package` to its waiter, or drops it when nobody waits, as with
    /// a reply that arrives after its caller timed out.
    pub fn deliver(&self, package: Package) {
        if let Err(package) = self.deliver_if_awaited(package) {
            debug!(
                correlation_id = %package.correlation_id(),
                subject = %package.subject(),
                "dropping unclaimed response"
            );
        }
    }

    /// Hands `package` to its waiter if one is registered; otherwise returns
    /// it untouched.
    ///
    /// # Errors
    ///
    /// Returns the package back when nobody waits on its correlation id.
    pub fn deliver_if_awaited(&self, package: Package) -> Result<(), Package> {
        match self.waiters.remove(package.correlation_id()) {
            Some((_, tx)) => {
                if let Err(package) = tx.send(package) {
                    debug!(
                        correlation_id = %package.correlation_id(),
                        "waiter gave up before the response arrived"
                    );
                }
                Ok(())
            }
            None => Err(package),
        }
    }

    /// Drops the waiter for `correlation_id`, if any.
    pub fn cancel(&self, correlation_id: &str) {
        self.waiters.remove(correlation_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
