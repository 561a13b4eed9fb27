//! Connection events and the bounded queue the host polls.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

/// Minimum spacing between queue-depth warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(10);

/// What a connection reports back to the host.
///
/// For one connection tag the order is always `Connected`, any number of
/// `Data`, then exactly one `Disconnected`. A connect attempt that fails
/// before the stream is usable emits only the `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// TCP (and TLS, when configured) handshake completed.
    Connected { ctag: String },
    /// One framed message from the peer. Dropping the payload releases the
    /// receive buffer.
    Data { ctag: String, payload: Bytes },
    /// The connection ended. Emitted exactly once per connect attempt.
    Disconnected { ctag: String },
}

impl Event {
    /// The connection tag this event belongs to.
    pub fn ctag(&self) -> &str {
        match self {
            Event::Connected { ctag } => ctag,
            Event::Data { ctag, .. } => ctag,
            Event::Disconnected { ctag } => ctag,
        }
    }
}

/// Bounded FIFO between the receive worker and the polling host.
///
/// `Data` pushes are lossy once the hard cap is reached; lifecycle events
/// always go through so the `Connected`/`Disconnected` pairing holds.
pub(crate) struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    warn_depth: usize,
    max_depth: usize,
    last_warn: Mutex<Option<Instant>>,
}

impl EventQueue {
    pub fn new(warn_depth: usize, max_depth: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            warn_depth,
            max_depth,
            last_warn: Mutex::new(None),
        }
    }

    /// Enqueue a `Connected` or `Disconnected` event. Never dropped.
    pub fn push_lifecycle(&self, event: Event) {
        self.inner.lock().push_back(event);
    }

    /// Enqueue a `Data` event. Returns false when the queue is at capacity
    /// and the event was dropped.
    pub fn push_data(&self, event: Event) -> bool {
        let depth = {
            let mut queue = self.inner.lock();
            if queue.len() >= self.max_depth {
                return false;
            }
            queue.push_back(event);
            queue.len()
        };

        if depth >= self.warn_depth {
            self.warn_depth_exceeded(depth);
        }
        true
    }

    pub fn pop(&self) -> Option<Event> {
        self.inner.lock().pop_front()
    }

    /// Drop everything queued, returning how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn warn_depth_exceeded(&self, depth: usize) {
        let mut last = self.last_warn.lock();
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t) >= WARN_INTERVAL) {
            *last = Some(now);
            tracing::warn!(
                "event queue depth {} exceeds warning threshold {}; host is polling too slowly",
                depth,
                self.warn_depth
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(ctag: &str, n: u8) -> Event {
        Event::Data {
            ctag: ctag.to_string(),
            payload: Bytes::from(vec![n]),
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = EventQueue::new(10, 100);
        q.push_lifecycle(Event::Connected {
            ctag: "t#1".into(),
        });
        assert!(q.push_data(data("t#1", 1)));
        assert!(q.push_data(data("t#1", 2)));

        assert!(matches!(q.pop(), Some(Event::Connected { .. })));
        assert_eq!(q.pop(), Some(data("t#1", 1)));
        assert_eq!(q.pop(), Some(data("t#1", 2)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_data_dropped_at_cap() {
        let q = EventQueue::new(2, 4);
        for i in 0..4 {
            assert!(q.push_data(data("t#1", i)));
        }
        assert!(!q.push_data(data("t#1", 99)));
        assert_eq!(q.len(), 4);

        // lifecycle events are exempt from the cap
        q.push_lifecycle(Event::Disconnected {
            ctag: "t#1".into(),
        });
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn test_clear_reports_count() {
        let q = EventQueue::new(10, 100);
        assert!(q.push_data(data("t#1", 0)));
        assert!(q.push_data(data("t#1", 1)));
        assert_eq!(q.clear(), 2);
        assert_eq!(q.pop(), None);
    }
}
