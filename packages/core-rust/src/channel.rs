//! Duplex channel abstraction and an in-memory implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ChannelError;
use crate::messages::{Package, RawPackage};

/// One endpoint of a bidirectional package stream.
///
/// Implementations must be safe to share between a reader task and a writer
/// task. `receive` is non-blocking: callers check `poll` (or simply handle
/// [`ChannelError::Empty`]) and retry later.
pub trait DuplexChannel: Send + Sync {
    /// Whether at least one frame is ready to be received.
    fn poll(&self) -> bool;

    /// Takes the next frame.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Empty`] if nothing is ready.
    /// - [`ChannelError::Closed`] if the peer hung up and the queue is drained.
    /// - [`ChannelError::Rejected`] if the frame's type tag is invalid.
    fn receive(&self) -> Result<Package, ChannelError>;

    /// Sends a package to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if either end has been closed.
    fn send(&self, package: Package) -> Result<(), ChannelError>;
}

// ---------------------------------------------------------------------------
// In-memory pipe
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PipeShared {
    queues: [Mutex<VecDeque<RawPackage>>; 2],
    closed: AtomicBool,
}

/// One end of an in-memory pipe created by [`pipe`].
///
/// Clones share the same end, so a single end can be used as both the
/// inbound and outbound channel of a connection.
#[derive(Debug, Clone)]
pub struct PipeEnd {
    shared: Arc<PipeShared>,
    side: usize,
}

/// Creates a connected pair of in-memory channel ends.
///
/// Whatever one end sends, the other receives, in order.
#[must_use]
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let shared = Arc::new(PipeShared::default());
    (
        PipeEnd {
            shared: Arc::clone(&shared),
            side: 0,
        },
        PipeEnd { shared, side: 1 },
    )
}

impl PipeEnd {
    fn incoming(&self) -> &Mutex<VecDeque<RawPackage>> {
        &self.shared.queues[self.side]
    }

    fn outgoing(&self) -> &Mutex<VecDeque<RawPackage>> {
        &self.shared.queues[1 - self.side]
    }

    /// Closes the pipe for both ends. Frames already queued can still be read.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Sends an untyped frame, bypassing the type check. Used to feed
    /// frames from foreign peers.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the pipe has been closed.
    pub fn send_raw(&self, raw: RawPackage) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.outgoing().lock().push_back(raw);
        Ok(())
    }
}

impl DuplexChannel for PipeEnd {
    fn poll(&self) -> bool {
        !self.incoming().lock().is_empty()
    }

    fn receive(&self) -> Result<Package, ChannelError> {
        let next = self.incoming().lock().pop_front();
        match next {
            Some(raw) => raw.into_package().map_err(ChannelError::Rejected),
            None if self.is_closed() => Err(ChannelError::Closed),
            None => Err(ChannelError::Empty),
        }
    }

    fn send(&self, package: Package) -> Result<(), ChannelError> {
        self.send_raw(RawPackage::from(package))
    }
}
