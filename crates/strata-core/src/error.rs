//! Error types for the strata-core crate

use strata_chunkstore::ChunkStoreError;
use strata_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Broad classification of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad settings or malformed input; never retried
    Configuration,
    /// Stored bytes failed block authentication or checksum
    BadData,
    /// Transport checksum mismatch on a chunk
    BadChunk,
    /// May succeed if repeated
    Transient,
    /// A size or structure invariant was violated
    Integrity,
    /// No such file
    NotFound,
    /// Requested range lies outside the file
    Range,
}

/// Errors that can occur in core file operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// File already exists
    #[error("file already exists: {0}")]
    FileExists(String),

    /// Invalid file name
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// Record violates a structural rule
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Range start beyond end of file
    #[error("range start {start} beyond file size {size}")]
    RangeOutOfBounds { start: u64, size: u64 },

    /// Size or checksum invariant violated
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config loading error
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk store error
    #[error("chunk store error: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    /// Crypto error
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl CoreError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::RangeOutOfBounds { .. } => ErrorKind::Range,
            Self::FileExists(_)
            | Self::InvalidName(_)
            | Self::InvalidRecord(_)
            | Self::Configuration(_)
            | Self::Config(_)
            | Self::Serialization(_) => ErrorKind::Configuration,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Io(_) => ErrorKind::Transient,
            Self::Crypto(e) => crypto_kind(e),
            Self::ChunkStore(e) => match e {
                ChunkStoreError::BadChunk { .. } => ErrorKind::BadChunk,
                ChunkStoreError::Integrity(_) => ErrorKind::Integrity,
                ChunkStoreError::Configuration(_) => ErrorKind::Configuration,
                ChunkStoreError::Crypto(e) => crypto_kind(e),
                e if e.is_transient() => ErrorKind::Transient,
                _ => ErrorKind::Configuration,
            },
        }
    }

    /// Whether repeating the operation may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

fn crypto_kind(e: &CryptoError) -> ErrorKind {
    if e.is_bad_data() {
        ErrorKind::BadData
    } else if e.is_configuration() {
        ErrorKind::Configuration
    } else if matches!(e, CryptoError::LengthMismatch { .. }) {
        ErrorKind::Integrity
    } else {
        ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let bad = CoreError::from(CryptoError::BadData {
            block: 3,
            reason: "tag".into(),
        });
        assert_eq!(bad.kind(), ErrorKind::BadData);

        let chunk = CoreError::from(ChunkStoreError::BadChunk {
            idx: 0,
            expected: "00".into(),
            actual: "01".into(),
        });
        assert_eq!(chunk.kind(), ErrorKind::BadChunk);

        let transient = CoreError::from(ChunkStoreError::Backend("503".into()));
        assert!(transient.is_transient());

        assert_eq!(
            CoreError::RangeOutOfBounds { start: 5, size: 1 }.kind(),
            ErrorKind::Range
        );
    }
}
