//! Registry of named mailboxes.
//!
//! Mailbox reads and writes are delegated to a [`Worker`], so the caller is
//! decoupled from a potentially blocking mailbox operation; the caller awaits
//! the worker's completion instead of polling its `finished` flag.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use aocc_core::Package;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::message_box::{Direction, MessageBox};
use crate::error::FabricError;
use crate::service::Worker;

type BoxMap = Arc<RwLock<HashMap<String, Arc<MessageBox>>>>;

fn lookup(boxes: &BoxMap, name: &str) -> Result<Arc<MessageBox>, FabricError> {
    boxes
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| FabricError::BoxNotFound {
            name: name.to_owned(),
        })
}

/// Hands a value read by an abandoned worker back to where it came from.
type Salvage<T> = Box<dyn FnOnce(T) + Send>;

/// Owns a box worker while its caller awaits it.
///
/// Dropping it before the caller collects the result aborts the worker. A
/// worker that already popped a package cannot be interrupted anymore; once
/// it finishes, `salvage` receives whatever it read.
struct Pending<T: Send + 'static> {
    worker: Option<Worker<Result<T, FabricError>>>,
    salvage: Option<Salvage<T>>,
}

impl<T: Send + 'static> Pending<T> {
    fn new(worker: Worker<Result<T, FabricError>>, salvage: Option<Salvage<T>>) -> Self {
        Self {
            worker: Some(worker),
            salvage,
        }
    }

    /// Awaits the worker and unwraps the operation result it captured.
    async fn finish(mut self) -> Result<T, FabricError> {
        if let Some(worker) = &self.worker {
            worker.join().await;
        }
        let Some(worker) = self.worker.take() else {
            return Err(FabricError::WorkerFailed("worker already collected".to_string()));
        };
        worker.take_result().unwrap_or_else(|| {
            Err(FabricError::WorkerFailed(
                worker.error().unwrap_or_else(|| "no result".to_string()),
            ))
        })
    }
}

impl<T: Send + 'static> Drop for Pending<T> {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.abort();
        let Some(salvage) = self.salvage.take() else {
            return;
        };
        let name = worker.name().to_owned();
        let recover = async move {
            worker.join().await;
            if let Some(Ok(value)) = worker.take_result() {
                salvage(value);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(recover);
            }
            Err(_) => warn!(worker = %name, "no runtime left to recover an abandoned read"),
        }
    }
}

/// Salvage that puts a package back at the head of box `name`.
fn requeue_into(boxes: BoxMap, name: String) -> Salvage<Package> {
    Box::new(move |package| {
        let requeued = lookup(&boxes, &name).is_ok_and(|mailbox| mailbox.requeue(package));
        if requeued {
            debug!(mailbox = %name, "requeued package read by an abandoned worker");
        } else {
            warn!(mailbox = %name, "package read by an abandoned worker was lost");
        }
    })
}

/// Thread-safe registry of [`MessageBox`]es keyed by name.
///
/// All boxes in one handler share the handler's [`Direction`]. Boxes live
/// until explicitly deleted.
#[derive(Debug, Clone)]
pub struct BoxHandler {
    direction: Direction,
    boxes: BoxMap,
}

impl BoxHandler {
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            boxes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Creates a box named `name`. Adding an existing name leaves the
    /// existing box in place and still reports success.
    pub fn add_box(&self, name: &str) -> bool {
        let mut boxes = self.boxes.write();
        if !boxes.contains_key(name) {
            debug!(mailbox = %name, direction = %self.direction, "mailbox added");
            boxes.insert(
                name.to_owned(),
                Arc::new(MessageBox::new(name, self.direction)),
            );
        }
        true
    }

    /// Removes the box named `name` and closes it, releasing blocked readers.
    /// Deleting a missing name is a no-op success.
    pub fn del_box(&self, name: &str) -> bool {
        if let Some(removed) = self.boxes.write().remove(name) {
            removed.close();
            debug!(mailbox = %name, direction = %self.direction, "mailbox removed");
        }
        true
    }

    #[must_use]
    pub fn get_box(&self, name: &str) -> Option<Arc<MessageBox>> {
        self.boxes.read().get(name).cloned()
    }

    #[must_use]
    pub fn box_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.boxes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Pops the head of box `name` through a worker.
    ///
    /// # Errors
    ///
    /// - [`FabricError::BoxNotFound`] if no such box exists (or it is deleted
    ///   while a blocking read waits).
    /// - [`FabricError::BoxEmpty`] if `block` is false and the box is empty.
    pub async fn get_package_from_box(
        &self,
        name: &str,
        block: bool,
    ) -> Result<Package, FabricError> {
        let boxes = Arc::clone(&self.boxes);
        let salvage = requeue_into(Arc::clone(&self.boxes), name.to_owned());
        let worker = Worker::start(
            format!("get_package_from_box({name})"),
            move |(name, block): (String, bool)| async move {
                let result = match lookup(&boxes, &name) {
                    Ok(mailbox) => mailbox.get_package(block).await,
                    Err(err) => Err(err),
                };
                Ok::<_, Infallible>(result)
            },
            (name.to_owned(), block),
        );
        Pending::new(worker, Some(salvage)).finish().await
    }

    /// Blocking read of box `name` bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// As [`get_package_from_box`](Self::get_package_from_box), plus
    /// [`FabricError::Timeout`].
    pub async fn get_package_from_box_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Package, FabricError> {
        let boxes = Arc::clone(&self.boxes);
        let salvage = requeue_into(Arc::clone(&self.boxes), name.to_owned());
        let worker = Worker::start(
            format!("get_package_from_box({name})"),
            move |name: String| async move {
                let result = match lookup(&boxes, &name) {
                    Ok(mailbox) => mailbox.get_package_timeout(timeout).await,
                    Err(err) => Err(err),
                };
                Ok::<_, Infallible>(result)
            },
            name.to_owned(),
        );
        Pending::new(worker, Some(salvage)).finish().await
    }

    /// Appends `package` to box `name` through a worker.
    ///
    /// Returns the box's own success flag.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::BoxNotFound`] if no such box exists.
    pub async fn add_package_to_box(
        &self,
        name: &str,
        package: Package,
    ) -> Result<bool, FabricError> {
        let boxes = Arc::clone(&self.boxes);
        let worker = Worker::start(
            format!("add_package_to_box({name})"),
            move |(name, package): (String, Package)| async move {
                let result = lookup(&boxes, &name).map(|mailbox| mailbox.add_package(package));
                Ok::<_, Infallible>(result)
            },
            (name.to_owned(), package),
        );
        Pending::new(worker, None).finish().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::test_support::wait_until;

    fn pkg(id: &str) -> Package {
        Package::request("A", "B", id, "ping")
    }

    #[test]
    fn add_box_is_idempotent() {
        let handler = BoxHandler::new(Direction::Inbound);
        assert!(handler.add_box("inbox"));
        let first = handler.get_box("inbox").unwrap();
        first.add_package(pkg("kept"));

        assert!(handler.add_box("inbox"));
        let second = handler.get_box("inbox").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
        assert_eq!(handler.box_names(), vec!["inbox"]);
    }

    #[test]
    fn del_missing_box_is_noop_success() {
        let handler = BoxHandler::new(Direction::Outbound);
        assert!(handler.del_box("ghost"));
        handler.add_box("real");
        assert!(handler.del_box("real"));
        assert!(handler.get_box("real").is_none());
    }

    #[test]
    fn boxes_carry_handler_direction() {
        let handler = BoxHandler::new(Direction::Outbound);
        handler.add_box("out");
        assert_eq!(handler.get_box("out").unwrap().direction(), Direction::Outbound);
    }

    #[tokio::test]
    async fn add_then_get_through_workers() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");

        assert!(handler.add_package_to_box("inbox", pkg("1")).await.unwrap());
        assert!(handler.add_package_to_box("inbox", pkg("2")).await.unwrap());

        let first = handler.get_package_from_box("inbox", false).await.unwrap();
        let second = handler.get_package_from_box("inbox", true).await.unwrap();
        assert_eq!(first.correlation_id(), "1");
        assert_eq!(second.correlation_id(), "2");
    }

    #[tokio::test]
    async fn missing_box_reports_not_found() {
        let handler = BoxHandler::new(Direction::Inbound);

        let err = handler.get_package_from_box("nope", false).await.unwrap_err();
        assert!(matches!(err, FabricError::BoxNotFound { name } if name == "nope"));

        let err = handler
            .add_package_to_box("nope", pkg("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::BoxNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_box_non_blocking_reports_empty() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");
        let err = handler.get_package_from_box("inbox", false).await.unwrap_err();
        assert!(matches!(err, FabricError::BoxEmpty { .. }));
    }

    #[tokio::test]
    async fn blocking_read_sees_later_push() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");

        let reader = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.get_package_from_box("inbox", true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.add_package_to_box("inbox", pkg("late")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.correlation_id(), "late");
    }

    #[tokio::test]
    async fn deleting_box_releases_blocked_reader() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");

        let reader = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.get_package_from_box("inbox", true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.del_box("inbox");

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(FabricError::BoxNotFound { .. })));
    }

    #[tokio::test]
    async fn timed_read_expires() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");
        let err = handler
            .get_package_from_box_timeout("inbox", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancelled_reader_does_not_steal_later_package() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            handler.get_package_from_box("inbox", true),
        )
        .await;
        assert!(abandoned.is_err());
        // Let the aborted worker wind down.
        tokio::time::sleep(Duration::from_millis(20)).await;

        handler.add_package_to_box("inbox", pkg("kept")).await.unwrap();
        let got = handler.get_package_from_box("inbox", false).await.unwrap();
        assert_eq!(got.correlation_id(), "kept");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn package_read_by_abandoned_worker_is_requeued() {
        let handler = BoxHandler::new(Direction::Inbound);
        handler.add_box("inbox");
        let mailbox = handler.get_box("inbox").unwrap();
        mailbox.add_package(pkg("first"));
        mailbox.add_package(pkg("second"));

        let popped = Arc::new(AtomicBool::new(false));
        let worker = {
            let mailbox = Arc::clone(&mailbox);
            let popped = Arc::clone(&popped);
            Worker::start(
                "slow-read",
                move |()| async move {
                    let result = mailbox.get_package(false).await;
                    popped.store(true, Ordering::SeqCst);
                    // No suspension point left, so abort cannot interrupt.
                    std::thread::sleep(Duration::from_millis(50));
                    Ok::<_, Infallible>(result)
                },
                (),
            )
        };
        let pending = Pending::new(
            worker,
            Some(requeue_into(Arc::clone(&handler.boxes), "inbox".to_string())),
        );

        assert!(wait_until(Duration::from_secs(1), || popped.load(Ordering::SeqCst)).await);
        assert_eq!(mailbox.len(), 1);
        drop(pending);

        assert!(wait_until(Duration::from_secs(1), || mailbox.len() == 2).await);
        assert_eq!(mailbox.try_get_package().unwrap().correlation_id(), "first");
        assert_eq!(mailbox.try_get_package().unwrap().correlation_id(), "second");
    }
}
