//! Message cipher interface and the non-cryptographic implementations.

use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Per-message transform applied to application packets before framing.
///
/// Implementations rebuild their state for every call, so a single instance
/// is safe to share between the send and receive paths.
pub trait PacketCipher: Send + Sync {
    /// Encrypt one message. The output may be longer than the input when the
    /// cipher carries a nonce or tag on the wire.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt one message produced by `encrypt` on the peer.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}

/// Identity transform, for plaintext connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl PacketCipher for NullCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Repeating-key XOR. Obfuscation only, not encryption.
pub struct XorCipher {
    key: Zeroizing<Vec<u8>>,
}

impl XorCipher {
    /// Key must be at least one byte.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(CryptoError::invalid_key_length("xor", 0));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    fn transform(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ self.key[i % self.key.len()])
            .collect()
    }
}

impl PacketCipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.transform(plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.transform(ciphertext))
    }

    fn name(&self) -> &'static str {
        "xor"
    }
}

/// RC4 stream cipher. Kept for compatibility with legacy servers only.
pub struct Rc4Cipher {
    key: Zeroizing<Vec<u8>>,
}

impl Rc4Cipher {
    /// Key must be between 1 and 256 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() || key.len() > 256 {
            return Err(CryptoError::invalid_key_length("rc4", key.len()));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    fn transform(&self, data: &[u8]) -> Vec<u8> {
        // KSA
        let mut s: [u8; 256] = [0; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(s[i])
                .wrapping_add(self.key[i % self.key.len()]);
            s.swap(i, j as usize);
        }

        // PRGA
        let mut out = Vec::with_capacity(data.len());
        let mut i: u8 = 0;
        let mut j: u8 = 0;
        for &b in data {
            i = i.wrapping_add(1);
            j = j.wrapping_add(s[i as usize]);
            s.swap(i as usize, j as usize);
            let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
            out.push(b ^ k);
        }
        out
    }
}

impl PacketCipher for Rc4Cipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.transform(plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.transform(ciphertext))
    }

    fn name(&self) -> &'static str {
        "rc4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_roundtrip() {
        let c = NullCipher;
        let msg = b"hello world";
        assert_eq!(c.decrypt(&c.encrypt(msg).unwrap()).unwrap(), msg);
        assert_eq!(c.encrypt(b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_xor_roundtrip() {
        let c = XorCipher::new(b"\x5a\xa5\x3c").unwrap();
        for len in [0usize, 1, 2, 3, 4, 255, 16384] {
            let msg: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            assert_eq!(c.decrypt(&c.encrypt(&msg).unwrap()).unwrap(), msg);
        }
    }

    #[test]
    fn test_xor_rejects_empty_key() {
        assert!(XorCipher::new(b"").is_err());
    }

    #[test]
    fn test_rc4_known_vector() {
        // Key "Key", plaintext "Plaintext".
        let c = Rc4Cipher::new(b"Key").unwrap();
        let ct = c.encrypt(b"Plaintext").unwrap();
        assert_eq!(
            ct,
            [0xbb, 0xf3, 0x16, 0xe8, 0xd9, 0x40, 0xaf, 0x0a, 0xd3]
        );
        assert_eq!(c.decrypt(&ct).unwrap(), b"Plaintext");
    }

    #[test]
    fn test_rc4_key_length_bounds() {
        assert!(Rc4Cipher::new(&[]).is_err());
        assert!(Rc4Cipher::new(&[0u8; 256]).is_ok());
        assert!(Rc4Cipher::new(&[0u8; 257]).is_err());
    }
}
