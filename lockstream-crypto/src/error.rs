use thiserror::Error;

/// Errors produced by the cipher implementations.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length for {cipher}: got {actual} bytes")]
    InvalidKeyLength {
        cipher: &'static str,
        actual: usize,
    },

    #[error("authentication failed: tag mismatch")]
    Authentication,

    #[error("input too short: {actual} bytes, need at least {min}")]
    InputTooShort { actual: usize, min: usize },

    #[error("keystream exhausted: {0} bytes would overflow the block counter")]
    CounterOverflow(usize),

    #[error("random source failure: {0}")]
    Rng(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl CryptoError {
    pub fn invalid_key_length(cipher: &'static str, actual: usize) -> Self {
        Self::InvalidKeyLength { cipher, actual }
    }

    pub fn too_short(actual: usize, min: usize) -> Self {
        Self::InputTooShort { actual, min }
    }
}
