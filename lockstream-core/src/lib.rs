//! Event-driven framed TCP client for interactive games and applications.
//!
//! A [`Client`] owns one connection slot: `connect` starts a background
//! connection, `send` queues framed messages, and the host polls
//! [`Client::try_next_event`] from its own loop. Messages are length-prefixed
//! on the wire and coalesced into batched writes. TLS and per-message
//! authenticated encryption (via `lockstream-crypto`) are both optional.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod framing;
pub mod logging;
pub mod stream;
pub mod tls;

mod queue;
mod transport;

#[cfg(test)]
mod tests;

pub use client::{Client, TransferStats};
pub use codec::{Packet, PacketCodec, PlainCodec, SecureCodec};
pub use config::{AddressFamily, ClientConfig, MAX_MESSAGE_SIZE, MAX_SEND_BUFFER};
pub use error::{Error, Result};
pub use event::Event;
pub use tls::{ClientIdentity, TlsOptions, TlsVersion};
