//! Error types for the strata-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while framing, encrypting or decoding a stream
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Block size rejected at construction
    #[error("invalid block size: {0}")]
    InvalidBlockSize(String),

    /// The block counter would wrap; nonces must never repeat under one key
    #[error("block counter exhausted at {0}")]
    CounterExhausted(u64),

    /// Authentication failed or the stream ended inside a block
    #[error("bad data in block {block}: {reason}")]
    BadData { block: u64, reason: String },

    /// Per-block checksum disagreed with the block contents
    #[error("bad data in block {block}: checksum mismatch, expected {expected}, got {actual}")]
    ChecksumMismatch {
        block: u64,
        expected: String,
        actual: String,
    },

    /// The source produced a different number of bytes than declared
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// True for errors that mean the bytes themselves are corrupt or incomplete
    pub fn is_bad_data(&self) -> bool {
        matches!(self, Self::BadData { .. } | Self::ChecksumMismatch { .. })
    }

    /// True for errors detected eagerly from bad parameters
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_) | Self::InvalidBlockSize(_) | Self::CounterExhausted(_)
        )
    }
}
