//! Public client facade.
//!
//! The API is synchronous and callable from any thread; a private two-worker
//! tokio runtime inside the client runs the connection tasks. The host polls
//! `try_next_event` from its own loop and never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::transport::{
    self, Shared, STATE_CLOSING, STATE_CONNECTED, STATE_CONNECTING, STATE_IDLE,
};

/// How long `disconnect` waits for the workers before giving up on the join.
const DISCONNECT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct ConnHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Transfer counters since the client was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One logical connection slot to a game server.
///
/// At most one connection is active at a time; each `connect` gets a fresh
/// connection tag `"<tag>#<id>"` so events from an old attempt cannot be
/// confused with the current one.
pub struct Client {
    tag: String,
    ctag: Mutex<String>,
    connect_seq: AtomicU64,
    shared: Arc<Shared>,
    conn: Mutex<Option<ConnHandle>>,
    runtime: Runtime,
}

impl Client {
    /// Create a client. `tag` names this client in logs and event tags and
    /// must not be empty.
    pub fn new(tag: &str, config: ClientConfig) -> Result<Self> {
        if tag.trim().is_empty() {
            return Err(Error::config("client tag must not be empty"));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("lockstream-{}", tag))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| Error::config_with_source("failed to start client runtime", e))?;

        Ok(Self {
            tag: tag.to_string(),
            ctag: Mutex::new(format!("{}#0", tag)),
            connect_seq: AtomicU64::new(0),
            shared: Arc::new(Shared::new(config)),
            conn: Mutex::new(None),
            runtime,
        })
    }

    /// Client with the default configuration.
    pub fn with_defaults(tag: &str) -> Result<Self> {
        Self::new(tag, ClientConfig::default())
    }

    /// Start a connection attempt. Returns immediately; progress arrives as
    /// events. A second call while a connection is active or winding down is
    /// a logged no-op.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        if host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }

        if self
            .shared
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_CONNECTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            info!("[{}] connect ignored, a connection is already active", self.ctag());
            return Ok(());
        }

        let stale_events = self.shared.events.clear();
        if stale_events > 0 {
            debug!(
                "[{}] discarded {} events from the previous session",
                self.ctag(),
                stale_events
            );
        }
        self.shared.send_queue.clear();

        let id = self.connect_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let ctag = format!("{}#{}", self.tag, id);
        *self.ctag.lock() = ctag.clone();

        let cancel = CancellationToken::new();
        let task = self.runtime.spawn(transport::run_connection(
            self.shared.clone(),
            host.to_string(),
            port,
            ctag,
            cancel.clone(),
        ));
        *self.conn.lock() = Some(ConnHandle { cancel, task });
        Ok(())
    }

    /// Tear the connection down. Safe to call in any state; waits briefly for
    /// the workers so the `Disconnected` event is usually queued on return.
    pub fn disconnect(&self) {
        let handle = self.conn.lock().take();
        let Some(handle) = handle else {
            return;
        };

        // mark teardown unless the workers already went back to idle
        let _ = self.shared.state.compare_exchange(
            STATE_CONNECTED,
            STATE_CLOSING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.shared.state.compare_exchange(
            STATE_CONNECTING,
            STATE_CLOSING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        handle.cancel.cancel();
        let _ = self.runtime.block_on(async {
            tokio::time::timeout(DISCONNECT_JOIN_TIMEOUT, handle.task).await
        });

        let dropped = self.shared.send_queue.clear();
        if dropped > 0 {
            debug!("[{}] dropped {} unsent messages", self.ctag(), dropped);
        }
    }

    /// Queue one message for sending. Returns false without queueing when the
    /// message is empty, larger than the configured maximum, or the client is
    /// not connected.
    pub fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() || data.len() > self.shared.config.max_message_size {
            debug!(
                "[{}] rejecting send of {} bytes (limit {})",
                self.ctag(),
                data.len(),
                self.shared.config.max_message_size
            );
            return false;
        }
        if self.shared.state() != STATE_CONNECTED {
            debug!("[{}] rejecting send while not connected", self.ctag());
            return false;
        }
        self.shared.send_queue.push(Bytes::copy_from_slice(data));
        true
    }

    /// Non-blocking event poll.
    pub fn try_next_event(&self) -> Option<Event> {
        self.shared.events.pop()
    }

    /// True once the handshake finished and until teardown begins.
    pub fn connected(&self) -> bool {
        self.shared.state() == STATE_CONNECTED
    }

    /// True while a connect attempt is still in flight.
    pub fn connecting(&self) -> bool {
        self.shared.state() == STATE_CONNECTING
    }

    /// The current connection tag, `"<tag>#<id>"`.
    pub fn ctag(&self) -> String {
        self.ctag.lock().clone()
    }

    /// The client tag passed to `new`.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Transfer counters across all connections of this client.
    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// Frame-echo server: reads `[len][payload]`, writes the same frame back.
    /// Returns the bound port. The server handles one connection then exits.
    fn spawn_echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            loop {
                let mut header = [0u8; 4];
                if stream.read_exact(&mut header).is_err() {
                    return;
                }
                let len = u32::from_be_bytes(header) as usize;
                let mut payload = vec![0u8; len];
                if stream.read_exact(&mut payload).is_err() {
                    return;
                }
                if stream.write_all(&header).is_err() || stream.write_all(&payload).is_err() {
                    return;
                }
            }
        });
        port
    }

    /// Server that sends one raw blob after accepting, then idles until the
    /// peer goes away.
    fn spawn_blob_server(blob: Vec<u8>, close_after: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&blob).unwrap();
            if close_after {
                return;
            }
            let mut buf = [0u8; 64];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    return;
                }
            }
        });
        port
    }

    fn wait_for_event(client: &Client, deadline: Duration) -> Option<Event> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if let Some(event) = client.try_next_event() {
                return Some(event);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_connect_send_disconnect() {
        let port = spawn_echo_server();
        let client = Client::with_defaults("echo").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        let connected = wait_for_event(&client, WAIT).expect("no Connected event");
        let ctag = connected.ctag().to_string();
        assert!(matches!(connected, Event::Connected { .. }));
        assert_eq!(ctag, "echo#1");
        assert!(client.connected());

        assert!(client.send(b"hello"));
        match wait_for_event(&client, WAIT).expect("no Data event") {
            Event::Data { ctag: t, payload } => {
                assert_eq!(t, ctag);
                assert_eq!(payload.as_ref(), b"hello");
            }
            other => panic!("expected Data, got {:?}", other),
        }

        client.disconnect();
        match wait_for_event(&client, WAIT).expect("no Disconnected event") {
            Event::Disconnected { ctag: t } => assert_eq!(t, ctag),
            other => panic!("expected Disconnected, got {:?}", other),
        }

        // exactly one Disconnected, nothing after it
        assert!(wait_for_event(&client, Duration::from_millis(200)).is_none());
        assert!(!client.connected());

        let stats = client.stats();
        assert_eq!(stats.bytes_sent, 5);
        assert_eq!(stats.bytes_received, 5);
    }

    #[test]
    fn test_send_ordering_preserved() {
        let port = spawn_echo_server();
        let client = Client::with_defaults("order").unwrap();
        client.connect("127.0.0.1", port).unwrap();
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));

        for i in 0u8..20 {
            assert!(client.send(&[i; 3]));
        }
        for i in 0u8..20 {
            match wait_for_event(&client, WAIT).expect("missing echo") {
                Event::Data { payload, .. } => assert_eq!(payload.as_ref(), &[i; 3]),
                other => panic!("expected Data, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_failed_connect_emits_only_disconnected() {
        // grab a port that nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = Client::with_defaults("refused").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        match wait_for_event(&client, WAIT).expect("no event from failed connect") {
            Event::Disconnected { ctag } => assert_eq!(ctag, "refused#1"),
            other => panic!("expected Disconnected, got {:?}", other),
        }
        assert!(!client.connected());
    }

    #[test]
    fn test_send_rejections() {
        let client = Client::with_defaults("limits").unwrap();

        // not connected
        assert!(!client.send(b"x"));

        let port = spawn_echo_server();
        client.connect("127.0.0.1", port).unwrap();
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));

        assert!(!client.send(b""));
        assert!(!client.send(&vec![0u8; crate::config::MAX_MESSAGE_SIZE + 1]));
        assert!(client.send(&vec![0u8; crate::config::MAX_MESSAGE_SIZE]));
    }

    #[test]
    fn test_second_connect_is_noop() {
        let port = spawn_echo_server();
        let client = Client::with_defaults("dup").unwrap();
        client.connect("127.0.0.1", port).unwrap();
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));

        client.connect("127.0.0.1", port).unwrap();
        assert_eq!(client.ctag(), "dup#1");
        assert!(client.connected());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Client::with_defaults("").is_err());
        assert!(Client::with_defaults("  ").is_err());

        let client = Client::with_defaults("args").unwrap();
        assert!(client.connect("", 80).is_err());
    }

    #[test]
    fn test_zero_length_frame_kills_connection() {
        // length field of 0 is a protocol violation
        let port = spawn_blob_server(vec![0, 0, 0, 0], false);
        let client = Client::with_defaults("zeroframe").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));
        match wait_for_event(&client, WAIT).expect("no Disconnected") {
            Event::Disconnected { .. } => {}
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[test]
    fn test_oversize_frame_kills_connection() {
        let len = (crate::config::MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        let port = spawn_blob_server(len.to_vec(), false);
        let client = Client::with_defaults("bigframe").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Disconnected { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_yields_no_data() {
        // announce 10 bytes, deliver 3, then close
        let mut blob = 10u32.to_be_bytes().to_vec();
        blob.extend_from_slice(&[1, 2, 3]);
        let port = spawn_blob_server(blob, true);

        let client = Client::with_defaults("truncated").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));
        // no Data event, straight to Disconnected
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Disconnected { .. })
        ));
        assert!(wait_for_event(&client, Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_reconnect_increments_ctag() {
        let port_a = spawn_echo_server();
        let client = Client::with_defaults("re").unwrap();

        client.connect("127.0.0.1", port_a).unwrap();
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));
        client.disconnect();
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Disconnected { .. })
        ));

        let port_b = spawn_echo_server();
        client.connect("127.0.0.1", port_b).unwrap();
        match wait_for_event(&client, WAIT).expect("no Connected on reconnect") {
            Event::Connected { ctag } => assert_eq!(ctag, "re#2"),
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    #[test]
    fn test_event_queue_overflow_drops_data_only() {
        // 20 one-byte frames, then close
        let mut blob = Vec::new();
        for i in 0u8..20 {
            blob.extend_from_slice(&1u32.to_be_bytes());
            blob.push(i);
        }
        let port = spawn_blob_server(blob, true);

        let config = ClientConfig {
            max_recv_queue: 4,
            recv_queue_warn: 2,
            ..ClientConfig::default()
        };
        let client = Client::new("overflow", config).unwrap();
        client.connect("127.0.0.1", port).unwrap();

        // let the receive worker process every frame before the first poll,
        // so it hits the cap with nothing draining the queue
        std::thread::sleep(Duration::from_millis(500));

        let mut data_events = 0;
        let mut disconnects = 0;
        let deadline = Instant::now() + WAIT;
        loop {
            match wait_for_event(&client, deadline.saturating_duration_since(Instant::now())) {
                Some(Event::Data { .. }) => data_events += 1,
                Some(Event::Disconnected { .. }) => {
                    disconnects += 1;
                    break;
                }
                Some(Event::Connected { .. }) => {}
                None => panic!("connection never finished"),
            }
        }

        assert!(data_events <= 4, "cap ignored: {} Data events", data_events);
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_ctag_before_first_connect() {
        let client = Client::with_defaults("fresh").unwrap();
        assert_eq!(client.ctag(), "fresh#0");
        assert!(!client.connected());
        assert!(!client.connecting());
        assert!(client.try_next_event().is_none());
    }

    #[test]
    fn test_peer_close_emits_disconnected() {
        let port = spawn_blob_server(Vec::new(), true);
        let client = Client::with_defaults("peerclose").unwrap();
        client.connect("127.0.0.1", port).unwrap();

        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Connected { .. })
        ));
        assert!(matches!(
            wait_for_event(&client, WAIT),
            Some(Event::Disconnected { .. })
        ));
    }
}
