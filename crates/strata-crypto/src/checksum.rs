//! Checksum block framing (CRC-32C, no encryption)
//!
//! ```text
//! [4 bytes: CRC-32C of block, big-endian][len bytes: block]
//! ```
//!
//! Used for chunk stores without per-object integrity of their own. Any
//! confidentiality has to come from a different layer (see [`crate::keystream`]).

use crate::{stream::Transform, CryptoError, Result};
use bytes::BytesMut;

/// Size of the per-block checksum
pub const CHECKSUM_SIZE: usize = 4;

/// Implicit plaintext block size used by checksum-framed files
pub const CHECKSUM_BLOCK_SIZE: usize = 8 * 1024;

/// Length of the framed output for `len` plaintext bytes
pub fn encoded_len(len: u64, block_size: u64) -> u64 {
    len + CHECKSUM_SIZE as u64 * len.div_ceil(block_size)
}

fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(CryptoError::InvalidBlockSize(
            "checksum block size must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Writer half
#[derive(Debug)]
pub struct ChecksumEncoder {
    block_size: usize,
    pending: Vec<u8>,
}

impl ChecksumEncoder {
    pub fn new(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        })
    }

    fn emit(block: &[u8], output: &mut BytesMut) {
        output.extend_from_slice(&crc32c::crc32c(block).to_be_bytes());
        output.extend_from_slice(block);
    }
}

impl Transform for ChecksumEncoder {
    fn name(&self) -> &'static str {
        "crc32c-encode"
    }

    fn update(&mut self, mut input: &[u8], output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let take = (self.block_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < self.block_size {
                return Ok(());
            }
            Self::emit(&self.pending, output);
            self.pending.clear();
        }
        while input.len() >= self.block_size {
            let (block, rest) = input.split_at(self.block_size);
            Self::emit(block, output);
            input = rest;
        }
        self.pending.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            Self::emit(&self.pending, output);
            self.pending.clear();
        }
        Ok(())
    }
}

/// Reader half
///
/// `first_block` is only used to number blocks in error reports when the
/// stream starts mid-file.
#[derive(Debug)]
pub struct ChecksumDecoder {
    frame_size: usize,
    block: u64,
    pending: Vec<u8>,
}

impl ChecksumDecoder {
    pub fn new(block_size: usize, first_block: u64) -> Result<Self> {
        validate_block_size(block_size)?;
        let frame_size = block_size + CHECKSUM_SIZE;
        Ok(Self {
            frame_size,
            block: first_block,
            pending: Vec::with_capacity(frame_size),
        })
    }

    fn check(&mut self, frame: &[u8], output: &mut BytesMut) -> Result<()> {
        if frame.len() <= CHECKSUM_SIZE {
            return Err(CryptoError::BadData {
                block: self.block,
                reason: format!("stream ended inside block ({} bytes left)", frame.len()),
            });
        }
        let (sum, body) = frame.split_at(CHECKSUM_SIZE);
        let actual = crc32c::crc32c(body).to_be_bytes();
        if sum != actual {
            return Err(CryptoError::ChecksumMismatch {
                block: self.block,
                expected: hex::encode(sum),
                actual: hex::encode(actual),
            });
        }
        output.extend_from_slice(body);
        self.block += 1;
        Ok(())
    }
}

impl Transform for ChecksumDecoder {
    fn name(&self) -> &'static str {
        "crc32c-decode"
    }

    fn update(&mut self, mut input: &[u8], output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < self.frame_size {
                return Ok(());
            }
            let frame = std::mem::take(&mut self.pending);
            self.check(&frame, output)?;
        }
        while input.len() >= self.frame_size {
            let (frame, rest) = input.split_at(self.frame_size);
            self.check(frame, output)?;
            input = rest;
        }
        self.pending.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.check(&frame, output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Pipeline;
    use proptest::prelude::*;

    fn encode(data: &[u8], block_size: usize) -> Vec<u8> {
        Pipeline::new()
            .then(ChecksumEncoder::new(block_size).unwrap())
            .apply(data)
            .unwrap()
    }

    fn decode(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
        Pipeline::new()
            .then(ChecksumDecoder::new(block_size, 0).unwrap())
            .apply(data)
    }

    #[test]
    fn test_known_frame() {
        // CRC-32C("123456789") = 0xE3069283
        let encoded = encode(b"123456789", 16);
        assert_eq!(&encoded[..4], &[0xE3, 0x06, 0x92, 0x83]);
        assert_eq!(&encoded[4..], b"123456789");
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(ChecksumEncoder::new(0).is_err());
        assert!(ChecksumDecoder::new(0, 0).is_err());
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        assert!(encode(b"", 8).is_empty());
    }

    #[test]
    fn test_mismatch_names_block() {
        let data = vec![9u8; 30];
        let encoded = encode(&data, 10);
        let frame = 10 + CHECKSUM_SIZE;

        let mut body_flip = encoded.clone();
        body_flip[frame + 6] ^= 0x80;
        match decode(&body_flip, 10) {
            Err(CryptoError::ChecksumMismatch { block, expected, actual }) => {
                assert_eq!(block, 1);
                assert_ne!(expected, actual);
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }

        let mut sum_flip = encoded;
        sum_flip[2 * frame] ^= 0x01;
        assert!(matches!(
            decode(&sum_flip, 10),
            Err(CryptoError::ChecksumMismatch { block: 2, .. })
        ));
    }

    #[test]
    fn test_first_block_offsets_error_index() {
        let mut encoded = encode(&[1u8; 20], 10);
        encoded[5] ^= 1;
        let result = Pipeline::new()
            .then(ChecksumDecoder::new(10, 40).unwrap())
            .apply(&encoded);
        assert!(matches!(result, Err(CryptoError::ChecksumMismatch { block: 40, .. })));
    }

    #[test]
    fn test_trailing_partial_checksum() {
        let encoded = encode(&[1u8; 20], 10);
        assert!(matches!(
            decode(&encoded[..14 + 3], 10),
            Err(CryptoError::BadData { block: 1, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_and_overhead(
            data in proptest::collection::vec(any::<u8>(), 0..2000),
            block_size in 1usize..300,
        ) {
            let encoded = encode(&data, block_size);
            prop_assert_eq!(encoded.len() as u64, encoded_len(data.len() as u64, block_size as u64));
            prop_assert_eq!(decode(&encoded, block_size).unwrap(), data);
        }
    }
}
