//! ChaCha20-Poly1305 authenticated encryption (RFC 7539 §2.8).
//!
//! Wire layout per message: `nonce(12) || ciphertext || tag(16)`. The tag
//! covers the ciphertext alone; this profile carries no associated data.

use zeroize::Zeroizing;

use crate::chacha20::{self, NONCE_LEN};
use crate::cipher::PacketCipher;
use crate::error::{CryptoError, Result};
use crate::poly1305::{self, TAG_LEN};

/// Authenticated cipher for application packets.
pub struct ChaCha20Poly1305Cipher {
    key: Zeroizing<[u8; chacha20::KEY_LEN]>,
}

impl ChaCha20Poly1305Cipher {
    /// Key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key: [u8; chacha20::KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::invalid_key_length("chacha20-poly1305", key.len()))?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// One-time Poly1305 key: the first 32 bytes of the block-0 keystream.
    fn poly_key(&self, nonce: &[u8; NONCE_LEN]) -> Result<Zeroizing<[u8; poly1305::KEY_LEN]>> {
        let mut block = Zeroizing::new([0u8; chacha20::BLOCK_LEN]);
        chacha20::xor_stream(&self.key, nonce, 0, &mut block[..])?;
        let mut key = Zeroizing::new([0u8; poly1305::KEY_LEN]);
        key.copy_from_slice(&block[..poly1305::KEY_LEN]);
        Ok(key)
    }
}

impl PacketCipher for ChaCha20Poly1305Cipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;
        let poly_key = self.poly_key(&nonce)?;

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(plaintext);
        chacha20::xor_stream(&self.key, &nonce, 1, &mut out[NONCE_LEN..])?;

        let tag = poly1305::authenticate(&poly_key, &out[NONCE_LEN..]);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let min = NONCE_LEN + TAG_LEN;
        if ciphertext.len() < min {
            return Err(CryptoError::too_short(ciphertext.len(), min));
        }
        let (nonce, rest) = ciphertext.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().unwrap();

        let poly_key = self.poly_key(&nonce)?;
        if !poly1305::verify(&poly_key, body, tag) {
            return Err(CryptoError::Authentication);
        }

        let mut out = body.to_vec();
        chacha20::xor_stream(&self.key, &nonce, 1, &mut out)?;
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }
}
