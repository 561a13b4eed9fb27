//! ChaCha20 stream cipher (RFC 7539).
//!
//! The block function and the little-endian key/nonce layout follow the RFC
//! exactly so that keystreams interoperate with other implementations.

use zeroize::Zeroizing;

use crate::cipher::PacketCipher;
use crate::error::{CryptoError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const BLOCK_LEN: usize = 64;

/// "expand 32-byte k", decoded little-endian.
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

#[inline(always)]
fn quarter_round(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(7);
}

/// Produce the 64-byte keystream block for (key, counter, nonce).
fn block(key: &[u32; 8], counter: u32, nonce: &[u32; 3], out: &mut [u8; BLOCK_LEN]) {
    let mut state: [u32; 16] = [
        SIGMA[0], SIGMA[1], SIGMA[2], SIGMA[3], key[0], key[1], key[2], key[3], key[4], key[5],
        key[6], key[7], counter, nonce[0], nonce[1], nonce[2],
    ];
    let initial = state;

    for _ in 0..10 {
        // column rounds
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);
        // diagonal rounds
        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    for (i, word) in state.iter_mut().enumerate() {
        *word = word.wrapping_add(initial[i]);
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
}

fn key_words(key: &[u8; KEY_LEN]) -> [u32; 8] {
    let mut w = [0u32; 8];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        w[i] = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    w
}

fn nonce_words(nonce: &[u8; NONCE_LEN]) -> [u32; 3] {
    let mut w = [0u32; 3];
    for (i, chunk) in nonce.chunks_exact(4).enumerate() {
        w[i] = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    w
}

/// XOR `data` in place with the ChaCha20 keystream starting at `counter`.
///
/// Fails if the input would require more keystream blocks than the 32-bit
/// counter can address from its starting value.
pub(crate) fn xor_stream(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    counter: u32,
    data: &mut [u8],
) -> Result<()> {
    let blocks_needed = data.len().div_ceil(BLOCK_LEN) as u64;
    let blocks_available = (u32::MAX as u64) - (counter as u64) + 1;
    if blocks_needed > blocks_available {
        return Err(CryptoError::CounterOverflow(data.len()));
    }

    let kw = key_words(key);
    let nw = nonce_words(nonce);
    let mut stream = [0u8; BLOCK_LEN];
    let mut ctr = counter;
    for chunk in data.chunks_mut(BLOCK_LEN) {
        block(&kw, ctr, &nw, &mut stream);
        for (b, k) in chunk.iter_mut().zip(stream.iter()) {
            *b ^= k;
        }
        ctr = ctr.wrapping_add(1);
    }
    Ok(())
}

/// Nonce handling mode for [`ChaCha20Cipher`].
enum NonceMode {
    /// One nonce for the lifetime of the cipher, never on the wire.
    Fixed([u8; NONCE_LEN]),
    /// Fresh random nonce per message, prepended to the ciphertext.
    PerMessage,
}

/// ChaCha20 without authentication.
///
/// Prefer [`crate::aead::ChaCha20Poly1305Cipher`] for new deployments; this
/// exists for servers that run the bare stream cipher.
pub struct ChaCha20Cipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    nonce: NonceMode,
}

impl ChaCha20Cipher {
    /// Cipher with a fixed nonce agreed out of band.
    pub fn with_fixed_nonce(key: &[u8], nonce: [u8; NONCE_LEN]) -> Result<Self> {
        Ok(Self {
            key: Self::check_key(key)?,
            nonce: NonceMode::Fixed(nonce),
        })
    }

    /// Cipher that draws a fresh nonce per message and carries it on the wire.
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            key: Self::check_key(key)?,
            nonce: NonceMode::PerMessage,
        })
    }

    fn check_key(key: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::invalid_key_length("chacha20", key.len()))?;
        Ok(Zeroizing::new(key))
    }
}

impl PacketCipher for ChaCha20Cipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.nonce {
            NonceMode::Fixed(nonce) => {
                let mut out = plaintext.to_vec();
                xor_stream(&self.key, nonce, 0, &mut out)?;
                Ok(out)
            }
            NonceMode::PerMessage => {
                let mut nonce = [0u8; NONCE_LEN];
                getrandom::fill(&mut nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;
                let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(plaintext);
                xor_stream(&self.key, &nonce, 0, &mut out[NONCE_LEN..])?;
                Ok(out)
            }
        }
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match &self.nonce {
            NonceMode::Fixed(nonce) => {
                let mut out = ciphertext.to_vec();
                xor_stream(&self.key, nonce, 0, &mut out)?;
                Ok(out)
            }
            NonceMode::PerMessage => {
                if ciphertext.len() < NONCE_LEN {
                    return Err(CryptoError::too_short(ciphertext.len(), NONCE_LEN));
                }
                let (nonce, body) = ciphertext.split_at(NONCE_LEN);
                let nonce: [u8; NONCE_LEN] = nonce.try_into().unwrap();
                let mut out = body.to_vec();
                xor_stream(&self.key, &nonce, 0, &mut out)?;
                Ok(out)
            }
        }
    }

    fn name(&self) -> &'static str {
        "chacha20"
    }
}
