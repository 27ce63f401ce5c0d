//! File records
//!
//! A [`FileRecord`] is everything needed to read a file back: its true size
//! and either the inline content or the key, codec and chunk list of its
//! chunked form. Records are validated on construction and deserialization,
//! so a record in hand is always internally consistent.

use crate::{CoreError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_chunkstore::{validate_chunk_list, ChunkInfo};
use strata_crypto::{conceal_size, crc32c_bytes, BlockCodec, FileKey};

/// Where a file's bytes live
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileStorage {
    /// Content kept in the record itself
    Inline { content: Bytes, crc32c: [u8; 4] },
    /// Content framed, padded and split across chunk objects
    Chunked {
        key: FileKey,
        codec: BlockCodec,
        chunk_store: String,
        chunks: Vec<ChunkInfo>,
    },
}

/// Validated description of a stored file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFileRecord", into = "RawFileRecord")]
pub struct FileRecord {
    size: u64,
    storage: FileStorage,
}

impl FileRecord {
    /// Record for a file stored inline
    pub fn inline(content: Bytes) -> Self {
        let crc32c = crc32c_bytes(&content);
        Self {
            size: content.len() as u64,
            storage: FileStorage::Inline { content, crc32c },
        }
    }

    /// Record for a chunked file
    ///
    /// The chunk sizes must add up to the encoded length of the concealed size.
    pub fn chunked(
        size: u64,
        key: FileKey,
        codec: BlockCodec,
        chunk_store: impl Into<String>,
        chunks: Vec<ChunkInfo>,
    ) -> Result<Self> {
        let record = Self {
            size,
            storage: FileStorage::Chunked {
                key,
                codec,
                chunk_store: chunk_store.into(),
                chunks,
            },
        };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        match &self.storage {
            FileStorage::Inline { content, crc32c } => {
                if content.len() as u64 != self.size {
                    return Err(CoreError::InvalidRecord(format!(
                        "inline content is {} bytes, size says {}",
                        content.len(),
                        self.size
                    )));
                }
                if crc32c_bytes(content) != *crc32c {
                    return Err(CoreError::Integrity(
                        "inline content does not match its crc32c".to_string(),
                    ));
                }
            }
            FileStorage::Chunked {
                codec,
                chunk_store,
                chunks,
                ..
            } => {
                if chunk_store.is_empty() {
                    return Err(CoreError::InvalidRecord("chunk store name is empty".to_string()));
                }
                validate_chunk_list(chunks)
                    .map_err(|e| CoreError::InvalidRecord(e.to_string()))?;
                let stored: u64 = chunks.iter().map(|c| c.size).sum();
                let expected = codec.encoded_len(conceal_size(self.size));
                if stored != expected {
                    return Err(CoreError::InvalidRecord(format!(
                        "chunks hold {stored} bytes, expected {expected} for a {} byte file",
                        self.size
                    )));
                }
            }
        }
        Ok(())
    }

    /// True file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.storage, FileStorage::Inline { .. })
    }

    /// Chunk list; empty for inline files
    pub fn chunks(&self) -> &[ChunkInfo] {
        match &self.storage {
            FileStorage::Chunked { chunks, .. } => chunks,
            FileStorage::Inline { .. } => &[],
        }
    }

    /// Bytes held by the backing store
    pub fn stored_len(&self) -> u64 {
        match &self.storage {
            FileStorage::Inline { content, .. } => content.len() as u64,
            FileStorage::Chunked { chunks, .. } => chunks.iter().map(|c| c.size).sum(),
        }
    }
}

/// Flat on-disk form of a record
#[derive(Serialize, Deserialize)]
struct RawFileRecord {
    size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<FileKey>,
    #[serde(default)]
    block_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crc32c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkInfo>>,
}

impl TryFrom<RawFileRecord> for FileRecord {
    type Error = CoreError;

    fn try_from(raw: RawFileRecord) -> Result<Self> {
        let record = match (raw.content, raw.chunks) {
            (Some(_), Some(_)) => {
                return Err(CoreError::InvalidRecord(
                    "record has both inline content and chunks".to_string(),
                ))
            }
            (Some(content), None) => {
                if raw.key.is_some() || raw.chunk_store.is_some() {
                    return Err(CoreError::InvalidRecord(
                        "inline record carries chunk fields".to_string(),
                    ));
                }
                let content = hex::decode(content)
                    .map_err(|e| CoreError::InvalidRecord(format!("inline content: {e}")))?;
                let crc32c = raw
                    .crc32c
                    .ok_or_else(|| CoreError::InvalidRecord("inline record without crc32c".to_string()))
                    .and_then(|s| decode_crc(&s))?;
                Self {
                    size: raw.size,
                    storage: FileStorage::Inline {
                        content: Bytes::from(content),
                        crc32c,
                    },
                }
            }
            (None, Some(chunks)) => Self {
                size: raw.size,
                storage: FileStorage::Chunked {
                    key: raw
                        .key
                        .ok_or_else(|| CoreError::InvalidRecord("chunked record without key".to_string()))?,
                    codec: BlockCodec::from_block_size(raw.block_size)?,
                    chunk_store: raw.chunk_store.ok_or_else(|| {
                        CoreError::InvalidRecord("chunked record without chunk store".to_string())
                    })?,
                    chunks,
                },
            },
            (None, None) => {
                return Err(CoreError::InvalidRecord(
                    "record has neither content nor chunks".to_string(),
                ))
            }
        };
        record.validate()?;
        Ok(record)
    }
}

impl From<FileRecord> for RawFileRecord {
    fn from(record: FileRecord) -> Self {
        match record.storage {
            FileStorage::Inline { content, crc32c } => Self {
                size: record.size,
                key: None,
                block_size: 0,
                content: Some(hex::encode(&content)),
                crc32c: Some(hex::encode(crc32c)),
                chunk_store: None,
                chunks: None,
            },
            FileStorage::Chunked {
                key,
                codec,
                chunk_store,
                chunks,
            } => Self {
                size: record.size,
                key: Some(key),
                block_size: codec.block_size_field(),
                content: None,
                crc32c: None,
                chunk_store: Some(chunk_store),
                chunks: Some(chunks),
            },
        }
    }
}

fn decode_crc(s: &str) -> Result<[u8; 4]> {
    hex::decode(s)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| CoreError::InvalidRecord(format!("bad crc32c {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FileKey {
        FileKey::from_bytes(&[7u8; 16]).unwrap()
    }

    fn chunk(idx: u32, size: u64) -> ChunkInfo {
        ChunkInfo {
            idx,
            file_id: format!("f{idx}"),
            crc32c: [0; 4],
            md5: None,
            size,
            account: None,
        }
    }

    #[test]
    fn test_inline_roundtrip() {
        let record = FileRecord::inline(Bytes::from_static(b"tiny file"));
        assert_eq!(record.size(), 9);
        assert!(record.is_inline());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"content\""));
        assert!(!json.contains("\"chunks\""));
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_chunked_roundtrip() {
        let codec = BlockCodec::Gcm { block_size: 65_536 };
        // 70000 conceals to 70656, two blocks of tag overhead
        let record = FileRecord::chunked(
            70_000,
            key(),
            codec,
            "local",
            vec![chunk(0, 65_552), chunk(1, 70_656 + 32 - 65_552)],
        )
        .unwrap();
        assert_eq!(record.stored_len(), 70_688);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["block_size"], 65_536);
        assert_eq!(json["key"], "07".repeat(16));
        let back: FileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_chunked_size_mismatch_rejected() {
        let err = FileRecord::chunked(
            70_000,
            key(),
            BlockCodec::Gcm { block_size: 65_536 },
            "local",
            vec![chunk(0, 70_000)],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_deserialize_rejects_bad_records() {
        let both = r#"{"size":1,"content":"61","crc32c":"00000000","chunks":[]}"#;
        assert!(serde_json::from_str::<FileRecord>(both).is_err());

        let neither = r#"{"size":1}"#;
        assert!(serde_json::from_str::<FileRecord>(neither).is_err());

        let bad_crc = r#"{"size":1,"content":"61","crc32c":"00000000"}"#;
        assert!(serde_json::from_str::<FileRecord>(bad_crc).is_err());

        let no_key = r#"{"size":1,"block_size":0,"chunk_store":"x","chunks":[]}"#;
        assert!(serde_json::from_str::<FileRecord>(no_key).is_err());

        let bad_block = format!(
            r#"{{"size":1,"key":"{}","block_size":1000,"chunk_store":"x","chunks":[]}}"#,
            "07".repeat(16)
        );
        assert!(serde_json::from_str::<FileRecord>(&bad_block).is_err());
    }

    #[test]
    fn test_checksum_codec_record() {
        // 100 bytes conceal to 112, one 8 KiB block with a 4-byte checksum
        let record =
            FileRecord::chunked(100, key(), BlockCodec::Checksum, "local", vec![chunk(0, 116)])
                .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["block_size"], 0);
        let back: FileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
