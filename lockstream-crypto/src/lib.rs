//! Message ciphers for the lockstream client.
//!
//! Everything here operates on one application packet at a time: state is
//! rebuilt per message, so a cipher can be shared by the send and receive
//! paths without synchronization. [`ChaCha20Poly1305Cipher`] is the
//! recommended choice; the others exist for plaintext links and legacy
//! servers.

pub mod aead;
pub mod chacha20;
pub mod cipher;
pub mod error;
pub mod poly1305;

pub use aead::ChaCha20Poly1305Cipher;
pub use chacha20::ChaCha20Cipher;
pub use cipher::{NullCipher, PacketCipher, Rc4Cipher, XorCipher};
pub use error::{CryptoError, Result};
