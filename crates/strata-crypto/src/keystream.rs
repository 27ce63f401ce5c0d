//! AES-128-CTR keystream stage
//!
//! Confidentiality layer for checksum-framed files, and the keystream behind
//! concealment padding. CTR is seekable, so a range read that starts at byte
//! `offset` of the file positions the keystream there without processing the
//! preceding bytes. The IV is all zeros; every file key is fresh.

use crate::{keys::FileKey, stream::Transform, Result};
use bytes::BytesMut;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// XOR the stream with the AES-128-CTR keystream starting at `offset`
pub struct CtrStage {
    cipher: Aes128Ctr,
}

impl CtrStage {
    pub fn new(key: &FileKey, offset: u64) -> Self {
        let iv = [0u8; 16];
        let mut cipher = Aes128Ctr::new(key.as_bytes().into(), &iv.into());
        cipher.seek(offset);
        Self { cipher }
    }

    /// Overwrite `buf` with keystream bytes
    pub fn fill_keystream(&mut self, buf: &mut [u8]) {
        buf.fill(0);
        self.cipher.apply_keystream(buf);
    }
}

impl Transform for CtrStage {
    fn name(&self) -> &'static str {
        "aes-ctr"
    }

    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()> {
        let start = output.len();
        output.extend_from_slice(input);
        self.cipher.apply_keystream(&mut output[start..]);
        Ok(())
    }

    fn finish(&mut self, _output: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Pipeline;

    fn key() -> FileKey {
        FileKey::from_bytes(&[0x42; 16]).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let encrypted = Pipeline::new().then(CtrStage::new(&key(), 0)).apply(&data).unwrap();
        assert_ne!(encrypted, data);
        let decrypted = Pipeline::new().then(CtrStage::new(&key(), 0)).apply(&encrypted).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_seek_matches_offset() {
        let data = vec![0x33u8; 4096];
        let encrypted = Pipeline::new().then(CtrStage::new(&key(), 0)).apply(&data).unwrap();
        let tail = Pipeline::new()
            .then(CtrStage::new(&key(), 1024))
            .apply(&encrypted[1024..])
            .unwrap();
        assert_eq!(tail, &data[1024..]);
    }

    #[test]
    fn test_keystream_is_encryption_of_zeros() {
        let mut stage = CtrStage::new(&key(), 0);
        let mut ks = [0xFFu8; 32];
        stage.fill_keystream(&mut ks);
        let zeros = Pipeline::new().then(CtrStage::new(&key(), 0)).apply(&[0u8; 32]).unwrap();
        assert_eq!(ks.to_vec(), zeros);
    }
}
