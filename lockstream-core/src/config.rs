//! Client configuration and protocol limits.

use std::time::Duration;

use crate::tls::TlsOptions;

/// Largest message accepted by `send` and the largest frame accepted from the
/// peer. Anything bigger is a protocol violation.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Upper bound on one coalesced write batch.
pub const MAX_SEND_BUFFER: usize = 64 * 1024;

/// Cap on the scratch buffer the send worker keeps between batches. Larger
/// batches allocate transiently.
pub const MAX_SCRATCH_BUFFER: usize = 64 * 1024;

/// Event-queue depth at which a warning is logged.
pub const RECV_QUEUE_WARN: usize = 1_000;

/// Hard cap on the event queue; received messages are dropped beyond this.
pub const MAX_RECV_QUEUE: usize = 10_000;

/// Which resolved addresses a connect attempt may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// Prefer an IPv6 address when one resolves, fall back to IPv4.
    #[default]
    Unspecified,
    /// First IPv4 address only.
    V4Only,
    /// First IPv6 address only.
    V6Only,
}

/// Per-client configuration. The defaults match what game servers expect;
/// most deployments only ever set `tls`.
#[derive(Clone)]
pub struct ClientConfig {
    /// Disable Nagle's algorithm on the connected socket.
    pub no_delay: bool,
    /// Deadline for one batched write before the connection is dropped.
    pub send_timeout: Duration,
    /// Address selection policy for resolved hostnames.
    pub address_family: AddressFamily,
    /// Transport-layer TLS. `None` for a plain TCP stream.
    pub tls: Option<TlsOptions>,
    /// See [`MAX_MESSAGE_SIZE`].
    pub max_message_size: usize,
    /// See [`MAX_SEND_BUFFER`].
    pub max_send_buffer: usize,
    /// See [`RECV_QUEUE_WARN`].
    pub recv_queue_warn: usize,
    /// See [`MAX_RECV_QUEUE`].
    pub max_recv_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            no_delay: true,
            send_timeout: Duration::from_millis(5_000),
            address_family: AddressFamily::default(),
            tls: None,
            max_message_size: MAX_MESSAGE_SIZE,
            max_send_buffer: MAX_SEND_BUFFER,
            recv_queue_warn: RECV_QUEUE_WARN,
            max_recv_queue: MAX_RECV_QUEUE,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("no_delay", &self.no_delay)
            .field("send_timeout", &self.send_timeout)
            .field("address_family", &self.address_family)
            .field("tls", &self.tls.is_some())
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}
