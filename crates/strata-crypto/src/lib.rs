//! # Strata Crypto
//!
//! Stream codecs for the Strata encrypted chunk storage engine.
//!
//! This crate provides:
//! - **GCM block framing**: AES-128-GCM per block, nonce derived from a block counter
//! - **Checksum block framing**: CRC-32C per block for stores without integrity of their own
//! - **Size concealment**: padded lengths that hide exact file sizes
//! - **Stream stages**: truncation, padding and a pipeline builder composing them
//!
//! ## Stored layout
//!
//! ```text
//! plaintext ──pad to conceal_size──▶ [tag|block][tag|block]...[tag|short block]
//! ```
//!
//! Every block decrypts on its own given the key and its index, which is what
//! lets a range read fetch and decrypt only the blocks it needs.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_crypto::{BlockCodec, FileKey, OsRandom, Pipeline};
//!
//! let key = FileKey::generate(&OsRandom);
//! let codec = BlockCodec::from_block_size(65_520)?;
//! let stored = Pipeline::new()
//!     .then_boxed(codec.encoder(Some(&key), 0)?)
//!     .apply(b"hello")?;
//! ```

pub mod checksum;
pub mod codec;
pub mod conceal;
pub mod error;
pub mod gcm;
pub mod keys;
pub mod keystream;
pub mod random;
pub mod stream;

pub use codec::{BlockCodec, DEFAULT_BLOCK_SIZE};
pub use conceal::{conceal_size, concealment_quantum, padding_stage, PaddingSource};
pub use error::{CryptoError, Result};
pub use keys::{FileKey, KEY_SIZE};
pub use keystream::CtrStage;
pub use random::{random_name, OsRandom, RandomSource, SeededRandom};
pub use stream::{ExpectLength, LeftTruncate, PadTo, Pipeline, RightTruncate, Transform};

/// CRC-32C of a whole buffer, as stored in records (big-endian bytes)
pub fn crc32c_bytes(data: &[u8]) -> [u8; 4] {
    crc32c::crc32c(data).to_be_bytes()
}

/// Incremental CRC-32C over a sequence of slices
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32cHasher {
    state: u32,
}

impl Crc32cHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, data);
    }

    pub fn finalize(&self) -> [u8; 4] {
        self.state.to_be_bytes()
    }
}
