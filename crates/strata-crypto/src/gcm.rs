//! Authenticated block framing (AES-128-GCM)
//!
//! The plaintext is cut into `block_size` blocks (the last may be shorter)
//! and every block is written as:
//!
//! ```text
//! [16 bytes: GCM tag][len bytes: ciphertext]
//! nonce = block counter, big-endian, left-padded with zeros to 12 bytes
//! ```
//!
//! Blocks are independently decryptable: a reader that starts at block `n`
//! only needs to start its counter at `n`. The counter increases by exactly one
//! per block and a stream that would wrap it is rejected, so a nonce is never
//! reused under one key.

use crate::{
    keys::{FileKey, NONCE_SIZE},
    stream::Transform,
    CryptoError, Result,
};
use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes128Gcm, Nonce, Tag,
};
use bytes::BytesMut;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// AES block alignment every GCM block size must respect
pub const BLOCK_ALIGNMENT: usize = 16;

/// Encode a block counter as a GCM nonce
pub fn block_counter_to_nonce(counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[NONCE_SIZE - 8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Length of the framed output for `len` plaintext bytes
pub fn encoded_len(len: u64, block_size: u64) -> u64 {
    len + TAG_SIZE as u64 * len.div_ceil(block_size)
}

pub(crate) fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size % BLOCK_ALIGNMENT != 0 {
        return Err(CryptoError::InvalidBlockSize(format!(
            "GCM block size must be a positive multiple of {}, got {}",
            BLOCK_ALIGNMENT, block_size
        )));
    }
    Ok(())
}

fn new_cipher(key: &FileKey) -> Result<Aes128Gcm> {
    Aes128Gcm::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

fn next_counter(counter: u64) -> Result<u64> {
    counter
        .checked_add(1)
        .ok_or(CryptoError::CounterExhausted(counter))
}

/// Writer half: plaintext in, `tag || ciphertext` blocks out
pub struct GcmEncoder {
    cipher: Aes128Gcm,
    block_size: usize,
    counter: u64,
    pending: Vec<u8>,
}

impl GcmEncoder {
    /// Create an encoder whose first block uses `initial_counter`
    pub fn new(key: &FileKey, block_size: usize, initial_counter: u64) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self {
            cipher: new_cipher(key)?,
            block_size,
            counter: initial_counter,
            pending: Vec::with_capacity(block_size),
        })
    }

    fn seal(&mut self, block: &[u8], output: &mut BytesMut) -> Result<()> {
        let nonce = block_counter_to_nonce(self.counter);
        let mut buf = block.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buf)
            .map_err(|_| CryptoError::InvalidBlockSize(format!("block of {} bytes too large", block.len())))?;
        output.extend_from_slice(&tag);
        output.extend_from_slice(&buf);
        self.counter = next_counter(self.counter)?;
        Ok(())
    }
}

impl Transform for GcmEncoder {
    fn name(&self) -> &'static str {
        "gcm-encode"
    }

    fn update(&mut self, mut input: &[u8], output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let take = (self.block_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < self.block_size {
                return Ok(());
            }
            let block = std::mem::take(&mut self.pending);
            self.seal(&block, output)?;
        }
        while input.len() >= self.block_size {
            let (block, rest) = input.split_at(self.block_size);
            self.seal(block, output)?;
            input = rest;
        }
        self.pending.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.seal(&block, output)?;
        }
        Ok(())
    }
}

/// Reader half: `tag || ciphertext` blocks in, verified plaintext out
pub struct GcmDecoder {
    cipher: Aes128Gcm,
    frame_size: usize,
    counter: u64,
    pending: Vec<u8>,
}

impl GcmDecoder {
    /// Create a decoder whose first block is expected to use `initial_counter`
    pub fn new(key: &FileKey, block_size: usize, initial_counter: u64) -> Result<Self> {
        validate_block_size(block_size)?;
        let frame_size = block_size + TAG_SIZE;
        Ok(Self {
            cipher: new_cipher(key)?,
            frame_size,
            counter: initial_counter,
            pending: Vec::with_capacity(frame_size),
        })
    }

    fn open(&mut self, frame: &[u8], output: &mut BytesMut) -> Result<()> {
        if frame.len() <= TAG_SIZE {
            return Err(CryptoError::BadData {
                block: self.counter,
                reason: format!("stream ended inside block ({} bytes left)", frame.len()),
            });
        }
        let (tag, ciphertext) = frame.split_at(TAG_SIZE);
        let nonce = block_counter_to_nonce(self.counter);
        let mut buf = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buf,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::BadData {
                block: self.counter,
                reason: "authentication tag mismatch".to_string(),
            })?;
        output.extend_from_slice(&buf);
        self.counter = next_counter(self.counter)?;
        Ok(())
    }
}

impl Transform for GcmDecoder {
    fn name(&self) -> &'static str {
        "gcm-decode"
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
            self.open(&frame, output)?;
        }
        while input.len() >= self.frame_size {
            let (frame, rest) = input.split_at(self.frame_size);
            self.open(frame, output)?;
            input = rest;
        }
        self.pending.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, output: &mut BytesMut) -> Result<()> {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.open(&frame, output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Pipeline;
    use proptest::prelude::*;

    fn key() -> FileKey {
        FileKey::from_bytes(&[7u8; 16]).unwrap()
    }

    fn encode(data: &[u8], block_size: usize, counter: u64) -> Vec<u8> {
        Pipeline::new()
            .then(GcmEncoder::new(&key(), block_size, counter).unwrap())
            .apply(data)
            .unwrap()
    }

    fn decode(data: &[u8], block_size: usize, counter: u64) -> Result<Vec<u8>> {
        Pipeline::new()
            .then(GcmDecoder::new(&key(), block_size, counter).unwrap())
            .apply(data)
    }

    #[test]
    fn test_nonce_encoding() {
        assert_eq!(block_counter_to_nonce(0), [0u8; 12]);
        assert_eq!(
            block_counter_to_nonce(0x0102),
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]
        );
        assert_eq!(&block_counter_to_nonce(u64::MAX)[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_bad_block_size_rejected() {
        assert!(matches!(
            GcmEncoder::new(&key(), 0, 0),
            Err(CryptoError::InvalidBlockSize(_))
        ));
        assert!(matches!(
            GcmDecoder::new(&key(), 100, 0),
            Err(CryptoError::InvalidBlockSize(_))
        ));
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        assert!(encode(b"", 16, 0).is_empty());
        assert!(decode(b"", 16, 0).unwrap().is_empty());
    }

    #[test]
    fn test_decode_from_middle_block() {
        let data: Vec<u8> = (0..100u8).collect();
        let encoded = encode(&data, 32, 0);
        let frame = 32 + TAG_SIZE;
        let tail = decode(&encoded[2 * frame..], 32, 2).unwrap();
        assert_eq!(tail, &data[64..]);
        assert!(decode(&encoded[2 * frame..], 32, 1).is_err());
    }

    #[test]
    fn test_tamper_is_localized() {
        let data = vec![0x5Au8; 16 * 4];
        let encoded = encode(&data, 16, 0);
        let frame = 16 + TAG_SIZE;
        for (pos, expected_block) in [(0usize, 0u64), (frame + 20, 1), (3 * frame + 3, 3)] {
            let mut tampered = encoded.clone();
            tampered[pos] ^= 0x01;
            match decode(&tampered, 16, 0) {
                Err(CryptoError::BadData { block, .. }) => assert_eq!(block, expected_block),
                other => panic!("expected BadData, got {:?}", other),
            }
            // Blocks before the tampered one still decode
            let prefix = expected_block as usize * frame;
            assert_eq!(decode(&tampered[..prefix], 16, 0).unwrap(), &data[..prefix - expected_block as usize * TAG_SIZE]);
        }
    }

    #[test]
    fn test_truncated_stream_is_bad_data() {
        let encoded = encode(&[1u8; 40], 16, 0);
        // Cut inside the last tag
        let cut = 2 * (16 + TAG_SIZE) + 10;
        assert!(matches!(
            decode(&encoded[..cut], 16, 0),
            Err(CryptoError::BadData { block: 2, .. })
        ));
        // Cut inside a full block's ciphertext: tag no longer matches
        assert!(matches!(
            decode(&encoded[..16 + TAG_SIZE - 3], 16, 0),
            Err(CryptoError::BadData { block: 0, .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encoded = encode(b"secret payload", 16, 0);
        let other = FileKey::from_bytes(&[8u8; 16]).unwrap();
        let result = Pipeline::new()
            .then(GcmDecoder::new(&other, 16, 0).unwrap())
            .apply(&encoded);
        assert!(result.unwrap_err().is_bad_data());
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut enc = GcmEncoder::new(&key(), 16, u64::MAX).unwrap();
        let mut out = BytesMut::new();
        assert!(matches!(
            enc.update(&[0u8; 16], &mut out),
            Err(CryptoError::CounterExhausted(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_and_overhead(
            data in proptest::collection::vec(any::<u8>(), 0..2000),
            blocks in 1usize..8,
            counter in 0u64..1_000_000,
        ) {
            let block_size = blocks * 16;
            let encoded = encode(&data, block_size, counter);
            prop_assert_eq!(encoded.len() as u64, encoded_len(data.len() as u64, block_size as u64));
            prop_assert_eq!(decode(&encoded, block_size, counter).unwrap(), data);
        }
    }
}
