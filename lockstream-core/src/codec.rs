//! Application packet codec: `[len][command:u32][token:u64][body]`.
//!
//! The leading length field counts command, token and body. It duplicates
//! the frame length one layer down and exists for symmetry with the servers;
//! decoders ignore its value and only require the fixed header to be present.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use lockstream_crypto::PacketCipher;

use crate::error::{Error, Result};

/// Bytes before the body: inner length, command, token.
pub const PACKET_HEADER_LEN: usize = 16;

/// One decoded application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u32,
    pub token: u64,
    pub body: Bytes,
}

/// Encode/decode between application packets and frame payloads.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, command: u32, token: u64, body: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, raw: &[u8]) -> Result<Packet>;
}

/// The plain wire layout, no cryptography.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl PacketCodec for PlainCodec {
    fn encode(&self, command: u32, token: u64, body: &[u8]) -> Result<Vec<u8>> {
        let mut out = BytesMut::with_capacity(PACKET_HEADER_LEN + body.len());
        out.put_u32((12 + body.len()) as u32);
        out.put_u32(command);
        out.put_u64(token);
        out.extend_from_slice(body);
        Ok(out.to_vec())
    }

    fn decode(&self, raw: &[u8]) -> Result<Packet> {
        if raw.len() < PACKET_HEADER_LEN {
            return Err(Error::decode(format!(
                "packet of {} bytes is shorter than the {}-byte header",
                raw.len(),
                PACKET_HEADER_LEN
            )));
        }
        let mut buf = &raw[4..]; // inner length field is not validated
        let command = buf.get_u32();
        let token = buf.get_u64();
        Ok(Packet {
            command,
            token,
            body: Bytes::copy_from_slice(buf),
        })
    }
}

/// A packet codec with a cipher layered over it.
///
/// Decode failures of any kind, including authentication failures, come back
/// as a single clean decode error; a tampered message never takes the
/// connection down.
pub struct SecureCodec {
    inner: Box<dyn PacketCodec>,
    cipher: Box<dyn PacketCipher>,
}

impl SecureCodec {
    pub fn new(inner: Box<dyn PacketCodec>, cipher: Box<dyn PacketCipher>) -> Self {
        Self { inner, cipher }
    }

    /// Cipher over the standard packet layout.
    pub fn with_cipher(cipher: Box<dyn PacketCipher>) -> Self {
        Self::new(Box::new(PlainCodec), cipher)
    }

    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }
}

impl PacketCodec for SecureCodec {
    fn encode(&self, command: u32, token: u64, body: &[u8]) -> Result<Vec<u8>> {
        let plain = self.inner.encode(command, token, body)?;
        Ok(self.cipher.encrypt(&plain)?)
    }

    fn decode(&self, raw: &[u8]) -> Result<Packet> {
        self.cipher
            .decrypt(raw)
            .map_err(|e| {
                tracing::debug!("{} decrypt failed: {}", self.cipher.name(), e);
                Error::decode("message failed decryption")
            })
            .and_then(|plain| {
                self.inner
                    .decode(&plain)
                    .map_err(|_| Error::decode("message failed decoding"))
            })
    }
}
