//! Outgoing message queue shared between `send` callers and the send worker.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// FIFO with a bulk-drain operation and an async wake signal.
///
/// `push` preserves insertion order across threads; `drain_into` moves the
/// whole backlog in one locked step so the send worker batches everything
/// queued since its last pass.
pub(crate) struct SendQueue {
    inner: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueue one message and wake the send worker.
    pub fn push(&self, message: Bytes) {
        self.inner.lock().push_back(message);
        self.notify.notify_one();
    }

    /// Move every queued message into `out`, oldest first.
    pub fn drain_into(&self, out: &mut Vec<Bytes>) {
        let mut queue = self.inner.lock();
        out.extend(queue.drain(..));
    }

    /// Discard all queued messages, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    /// Resolves after the next `push`. A push that raced ahead of this call
    /// is not lost; the stored permit makes the wait return immediately.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
