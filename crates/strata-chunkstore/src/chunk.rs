//! Chunk descriptors and backend object types

use crate::{ChunkStoreError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Descriptor of one stored chunk of a file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Position in the file's chunk list (0-based, contiguous)
    pub idx: u32,
    /// Opaque backend identifier
    pub file_id: String,
    /// CRC-32C of the whole chunk as stored
    #[serde(with = "hex_array")]
    pub crc32c: [u8; 4],
    /// Backend-verified MD5, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_array_opt")]
    pub md5: Option<[u8; 16]>,
    /// Stored length in bytes
    pub size: u64,
    /// Credential selector of the uploading account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl ChunkInfo {
    /// Byte range covering the whole chunk
    pub fn full_range(&self) -> Range<u64> {
        0..self.size
    }
}

/// Check that a chunk list is well formed: `idx` equals position, sizes non-zero
pub fn validate_chunk_list(chunks: &[ChunkInfo]) -> Result<()> {
    for (pos, chunk) in chunks.iter().enumerate() {
        if chunk.idx as usize != pos {
            return Err(ChunkStoreError::Integrity(format!(
                "chunk at position {} has idx {}",
                pos, chunk.idx
            )));
        }
        if chunk.size == 0 {
            return Err(ChunkStoreError::Integrity(format!("chunk {} is empty", chunk.idx)));
        }
        if chunk.file_id.is_empty() {
            return Err(ChunkStoreError::Integrity(format!(
                "chunk {} has no file id",
                chunk.idx
            )));
        }
    }
    Ok(())
}

/// What a backend reports after storing an object
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub file_id: String,
    pub size: u64,
    /// CRC-32C computed by the backend over what it stored
    pub crc32c: Option<[u8; 4]>,
    pub md5: Option<[u8; 16]>,
    pub account: Option<String>,
}

/// Bytes fetched from a backend
#[derive(Clone, Debug)]
pub struct FetchedObject {
    pub data: Bytes,
    /// CRC-32C of the whole stored object, when the transport reports it
    pub object_crc32c: Option<[u8; 4]>,
}

/// One chunk read request: the chunk and a byte range inside it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRead {
    pub chunk: ChunkInfo,
    pub range: Range<u64>,
}

impl ChunkRead {
    /// Read the whole chunk
    pub fn whole(chunk: ChunkInfo) -> Self {
        let range = chunk.full_range();
        Self { chunk, range }
    }

    /// True when the range covers the entire chunk
    pub fn is_whole(&self) -> bool {
        self.range.start == 0 && self.range.end == self.chunk.size
    }

    /// Number of bytes requested
    pub fn len(&self) -> u64 {
        self.range.end.saturating_sub(self.range.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(v: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

mod hex_array_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        v: &Option<[u8; N]>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<Option<[u8; N]>, D::Error> {
        let Some(s) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}
