//! Error types for the strata-chunkstore crate

use thiserror::Error;

/// Result type alias using `ChunkStoreError`
pub type Result<T> = std::result::Result<T, ChunkStoreError>;

/// Errors that can occur during chunk store operations
#[derive(Error, Debug)]
pub enum ChunkStoreError {
    /// Object not found (may be transient right after upload)
    #[error("object not found: {0}")]
    NotFound(String),

    /// Transport-reported checksum disagrees with the recorded one
    #[error("bad chunk {idx}: checksum mismatch, expected {expected}, got {actual}")]
    BadChunk {
        idx: u32,
        expected: String,
        actual: String,
    },

    /// Backend returned fewer or more bytes than requested
    #[error("short read on chunk {idx}: expected {expected} bytes, got {actual}")]
    ShortRead { idx: u32, expected: u64, actual: u64 },

    /// Backend refused or failed the request
    #[error("backend error: {0}")]
    Backend(String),

    /// Upload was acknowledged with different contents than were sent
    #[error("upload verification failed: {0}")]
    UploadMismatch(String),

    /// A size or sequence invariant does not hold; never retried
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error from the stream feeding the store
    #[error("crypto error: {0}")]
    Crypto(#[from] strata_crypto::CryptoError),
}

impl ChunkStoreError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::ShortRead { .. }
            | Self::Backend(_)
            | Self::UploadMismatch(_) => true,
            Self::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
            Self::BadChunk { .. }
            | Self::Integrity(_)
            | Self::Configuration(_)
            | Self::Crypto(_) => false,
        }
    }

    /// Whether a failed read should be attempted again
    ///
    /// A checksum mismatch is deterministic for one account, so it is only
    /// worth another attempt when an untried account remains.
    pub fn is_retryable_read(&self, untried_account: bool) -> bool {
        self.is_transient() || (untried_account && matches!(self, Self::BadChunk { .. }))
    }
}
