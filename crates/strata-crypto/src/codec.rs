//! Block codec selection
//!
//! A file record's `block_size` picks the framing: `0` means checksum framing
//! with the implicit [`CHECKSUM_BLOCK_SIZE`], anything else means GCM framing
//! with that block size. [`BlockCodec`] turns that field into the sizes the
//! range math needs and builds the matching stages.

use crate::{
    checksum::{self, ChecksumDecoder, ChecksumEncoder, CHECKSUM_BLOCK_SIZE, CHECKSUM_SIZE},
    gcm::{self, GcmDecoder, GcmEncoder, TAG_SIZE},
    keys::FileKey,
    stream::Transform,
    CryptoError, Result,
};

/// Default GCM block size: 64 KiB frames including the tag
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024 - TAG_SIZE as u32;

/// Framing used for a file's stored bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockCodec {
    /// AES-128-GCM, tag prepended per block
    Gcm { block_size: u32 },
    /// CRC-32C prepended per block, no encryption
    Checksum,
}

impl BlockCodec {
    /// Interpret a record's `block_size` field
    pub fn from_block_size(block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Ok(Self::Checksum);
        }
        gcm::validate_block_size(block_size as usize)?;
        Ok(Self::Gcm { block_size })
    }

    /// Value stored in the record's `block_size` field
    pub fn block_size_field(&self) -> u32 {
        match self {
            Self::Gcm { block_size } => *block_size,
            Self::Checksum => 0,
        }
    }

    /// Plaintext bytes per block
    pub fn decoded_block_size(&self) -> u64 {
        match self {
            Self::Gcm { block_size } => *block_size as u64,
            Self::Checksum => CHECKSUM_BLOCK_SIZE as u64,
        }
    }

    /// Framing bytes added per block
    pub fn overhead(&self) -> u64 {
        match self {
            Self::Gcm { .. } => TAG_SIZE as u64,
            Self::Checksum => CHECKSUM_SIZE as u64,
        }
    }

    /// Stored bytes per full block
    pub fn encoded_block_size(&self) -> u64 {
        self.decoded_block_size() + self.overhead()
    }

    /// Stored length for `len` plaintext bytes
    pub fn encoded_len(&self, len: u64) -> u64 {
        match self {
            Self::Gcm { block_size } => gcm::encoded_len(len, *block_size as u64),
            Self::Checksum => checksum::encoded_len(len, CHECKSUM_BLOCK_SIZE as u64),
        }
    }

    /// Framing stage for writing, first block numbered `counter`
    pub fn encoder(&self, key: Option<&FileKey>, counter: u64) -> Result<Box<dyn Transform>> {
        match self {
            Self::Gcm { block_size } => Ok(Box::new(GcmEncoder::new(
                require_key(key)?,
                *block_size as usize,
                counter,
            )?)),
            Self::Checksum => Ok(Box::new(ChecksumEncoder::new(CHECKSUM_BLOCK_SIZE)?)),
        }
    }

    /// Verifying stage for reading, first block numbered `counter`
    pub fn decoder(&self, key: Option<&FileKey>, counter: u64) -> Result<Box<dyn Transform>> {
        match self {
            Self::Gcm { block_size } => Ok(Box::new(GcmDecoder::new(
                require_key(key)?,
                *block_size as usize,
                counter,
            )?)),
            Self::Checksum => Ok(Box::new(ChecksumDecoder::new(CHECKSUM_BLOCK_SIZE, counter)?)),
        }
    }
}

fn require_key(key: Option<&FileKey>) -> Result<&FileKey> {
    key.ok_or_else(|| CryptoError::InvalidKey("GCM framing requires a file key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Pipeline;

    #[test]
    fn test_from_block_size() {
        assert_eq!(BlockCodec::from_block_size(0).unwrap(), BlockCodec::Checksum);
        assert_eq!(
            BlockCodec::from_block_size(DEFAULT_BLOCK_SIZE).unwrap(),
            BlockCodec::Gcm { block_size: 65_520 }
        );
        assert!(BlockCodec::from_block_size(1000).is_err());
    }

    #[test]
    fn test_sizes() {
        let gcm = BlockCodec::from_block_size(65_536).unwrap();
        assert_eq!(gcm.encoded_block_size(), 65_552);
        assert_eq!(gcm.encoded_len(70_000), 70_000 + 32);
        assert_eq!(gcm.block_size_field(), 65_536);

        let crc = BlockCodec::Checksum;
        assert_eq!(crc.decoded_block_size(), 8192);
        assert_eq!(crc.encoded_block_size(), 8196);
        assert_eq!(crc.encoded_len(8193), 8193 + 8);
        assert_eq!(crc.block_size_field(), 0);
    }

    #[test]
    fn test_gcm_requires_key() {
        let gcm = BlockCodec::Gcm { block_size: 16 };
        assert!(matches!(gcm.encoder(None, 0), Err(CryptoError::InvalidKey(_))));
        assert!(BlockCodec::Checksum.encoder(None, 0).is_ok());
    }

    #[test]
    fn test_boxed_stages_roundtrip() {
        let key = FileKey::from_bytes(&[1u8; 16]).unwrap();
        for codec in [BlockCodec::Gcm { block_size: 32 }, BlockCodec::Checksum] {
            let data = vec![0x61u8; 20_000];
            let encoded = Pipeline::new()
                .then_boxed(codec.encoder(Some(&key), 0).unwrap())
                .apply(&data)
                .unwrap();
            assert_eq!(encoded.len() as u64, codec.encoded_len(data.len() as u64));
            let decoded = Pipeline::new()
                .then_boxed(codec.decoder(Some(&key), 0).unwrap())
                .apply(&encoded)
                .unwrap();
            assert_eq!(decoded, data);
        }
    }
}
