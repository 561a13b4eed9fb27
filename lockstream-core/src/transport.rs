//! Connection engine: address selection, socket setup, TLS handshake and the
//! two workers that pump the stream.
//!
//! One task per direction. The receive worker owns the connection lifecycle:
//! it emits `Connected`, spawns the send worker once the stream is up, and is
//! the only place that emits `Disconnected`. The send worker drains the send
//! queue into coalesced batches and exits on cancellation or write failure.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AddressFamily, ClientConfig};
use crate::error::{Error, Result};
use crate::event::{Event, EventQueue};
use crate::framing::{self, Batcher};
use crate::queue::SendQueue;
use crate::stream::BoxedStream;
use crate::tls;

/// No connection and no attempt in progress.
pub(crate) const STATE_IDLE: u8 = 0;
/// `connect` accepted, handshake not finished.
pub(crate) const STATE_CONNECTING: u8 = 1;
/// Stream is up; `send` is accepted.
pub(crate) const STATE_CONNECTED: u8 = 2;
/// Teardown requested, workers still winding down.
pub(crate) const STATE_CLOSING: u8 = 3;

/// State shared between the client facade and the workers.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub state: AtomicU8,
    pub send_queue: SendQueue,
    pub events: EventQueue,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl Shared {
    pub fn new(config: ClientConfig) -> Self {
        let events = EventQueue::new(config.recv_queue_warn, config.max_recv_queue);
        Self {
            config,
            state: AtomicU8::new(STATE_IDLE),
            send_queue: SendQueue::new(),
            events,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

/// Pick the address a connect attempt should use.
fn select_address(addrs: &[SocketAddr], family: AddressFamily) -> Option<SocketAddr> {
    match family {
        AddressFamily::V4Only => addrs.iter().find(|a| a.is_ipv4()),
        AddressFamily::V6Only => addrs.iter().find(|a| a.is_ipv6()),
        // prefer IPv6 when both families resolve
        AddressFamily::Unspecified => addrs
            .iter()
            .find(|a| a.is_ipv6())
            .or_else(|| addrs.iter().find(|a| a.is_ipv4())),
    }
    .copied()
}

/// Numeric hosts connect directly; names go through the resolver and the
/// configured address-family policy.
async fn resolve_address(host: &str, port: u16, family: AddressFamily) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::network_with_source(format!("DNS lookup for {} failed", host), e))?
        .collect();

    select_address(&addrs, family)
        .ok_or_else(|| Error::network(format!("no suitable address for {}", host)))
}

/// TCP connect, socket options, then the TLS handshake when configured.
async fn open_stream(host: &str, port: u16, config: &ClientConfig) -> Result<BoxedStream> {
    let addr = resolve_address(host, port, config.address_family).await?;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::network_with_source(format!("connect to {} failed", addr), e))?;
    stream
        .set_nodelay(config.no_delay)
        .map_err(|e| Error::network_with_source("failed to set TCP_NODELAY", e))?;

    match &config.tls {
        None => Ok(Box::new(stream)),
        Some(options) => {
            let tls_config = tls::build_client_config(options)?;
            let connector = TlsConnector::from(Arc::new(tls_config));
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| Error::tls_with_source(format!("invalid SNI name {}", host), e))?;
            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| Error::tls_with_source("TLS handshake failed", e))?;
            Ok(Box::new(tls_stream))
        }
    }
}

/// The receive worker. Spawned by `Client::connect`; runs the connection
/// from handshake to the final `Disconnected`.
pub(crate) async fn run_connection(
    shared: Arc<Shared>,
    host: String,
    port: u16,
    ctag: String,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => Err(Error::network("cancelled during connect")),
        result = open_stream(&host, port, &shared.config) => result,
    };

    let stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!("[{}] connect to {}:{} failed: {}", ctag, host, port, e);
            finish(&shared, &ctag);
            return;
        }
    };

    // a disconnect during the handshake wins; tear down without Connected
    if shared
        .state
        .compare_exchange(
            STATE_CONNECTING,
            STATE_CONNECTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        debug!("[{}] connection cancelled before becoming usable", ctag);
        finish(&shared, &ctag);
        return;
    }

    info!(
        "[{}] connected to {}:{}{}",
        ctag,
        host,
        port,
        if shared.config.tls.is_some() { " (tls)" } else { "" }
    );
    shared.events.push_lifecycle(Event::Connected { ctag: ctag.clone() });

    let (mut reader, writer) = tokio::io::split(stream);
    let send_task = tokio::spawn(send_worker(
        shared.clone(),
        writer,
        cancel.clone(),
        ctag.clone(),
    ));

    recv_loop(&shared, &mut reader, &ctag, &cancel).await;

    // cleanup: stop the send worker, drop both halves, emit Disconnected once
    cancel.cancel();
    let _ = send_task.await;
    drop(reader);
    finish(&shared, &ctag);
}

/// Common tail of every connection attempt.
fn finish(shared: &Shared, ctag: &str) {
    shared
        .events
        .push_lifecycle(Event::Disconnected { ctag: ctag.to_string() });
    shared.state.store(STATE_IDLE, Ordering::Release);
    info!("[{}] disconnected", ctag);
}

async fn recv_loop(
    shared: &Shared,
    reader: &mut ReadHalf<BoxedStream>,
    ctag: &str,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[{}] receive worker cancelled", ctag);
                return;
            }
            frame = framing::read_frame(reader, shared.config.max_message_size) => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                shared
                    .bytes_received
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                let event = Event::Data {
                    ctag: ctag.to_string(),
                    payload: payload.freeze(),
                };
                if !shared.events.push_data(event) {
                    warn!("[{}] event queue full, dropping received message", ctag);
                }
            }
            Ok(None) => {
                info!("[{}] peer closed the connection", ctag);
                return;
            }
            Err(e) => {
                warn!("[{}] receive failed: {}", ctag, e);
                return;
            }
        }
    }
}

async fn send_worker(
    shared: Arc<Shared>,
    mut writer: WriteHalf<BoxedStream>,
    cancel: CancellationToken,
    ctag: String,
) {
    let mut batcher = Batcher::new(shared.config.max_send_buffer);
    let mut pending = Vec::new();

    loop {
        pending.clear();
        shared.send_queue.drain_into(&mut pending);

        if pending.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[{}] send worker cancelled", ctag);
                    break;
                }
                _ = shared.send_queue.notified() => continue,
            }
        }

        let total: usize = pending.iter().map(|m| m.len()).sum();
        let written = tokio::time::timeout(
            shared.config.send_timeout,
            batcher.write_all(&mut writer, &pending),
        )
        .await;

        match written {
            Ok(Ok(())) => {
                shared.bytes_sent.fetch_add(total as u64, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                warn!("[{}] send failed: {}", ctag, e);
                break;
            }
            Err(_) => {
                warn!(
                    "[{}] send timed out after {:?}",
                    ctag, shared.config.send_timeout
                );
                break;
            }
        }
    }

    // wake the receive worker so the whole connection comes down together;
    // Disconnected stays with the receive worker's cleanup
    cancel.cancel();
    drop(writer);
}
