//! File read/write orchestration
//!
//! Small files are kept inline in their record. Larger files go through the
//! write pipeline and are split into chunk objects:
//!
//! ```text
//! write: source ─▶ expect-length ─▶ pad-to ─▶ [aes-ctr] ─▶ block encoder ─▶ chunks
//! read:  chunks ─▶ right-truncate ─▶ block decoder ─▶ [aes-ctr] ─▶ left-truncate ─▶ right-truncate
//! ```
//!
//! The CTR stage is present only for checksum-framed files, whose framing
//! carries no confidentiality of its own.

use crate::{
    metadata::{validate_name, RecordStore},
    range::{plan_read, BlockLayout, ReadPlan},
    CoreError, FileRecord, FileStorage, Result, StrataConfig,
};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use strata_chunkstore::{ChunkStore, ChunkStoreError, StreamSlicer};
use strata_crypto::{
    conceal_size, crc32c_bytes, padding_stage, BlockCodec, CtrStage, ExpectLength, FileKey,
    LeftTruncate, Pipeline, RandomSource, RightTruncate,
};
use tracing::{debug, info, instrument, warn};

/// Byte stream fed to [`FileStore::write_file`]
pub type SourceStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Plaintext stream returned by [`FileStore::read_file`]
pub type FileStream = BoxStream<'static, Result<Bytes>>;

/// Settings for newly written files
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub inline_threshold: u64,
    pub codec: BlockCodec,
    pub chunk_size_limit: u64,
}

impl WriteOptions {
    pub fn from_config(config: &StrataConfig) -> Result<Self> {
        Ok(Self {
            inline_threshold: config.storage.inline_threshold,
            codec: config.block_codec()?,
            chunk_size_limit: config.effective_chunk_size_limit()?,
        })
    }
}

/// Stages turning `size` plaintext bytes into stored bytes
pub fn write_pipeline(
    key: &FileKey,
    codec: BlockCodec,
    size: u64,
    rng: &dyn RandomSource,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new()
        .then(ExpectLength::new(size))
        .then(padding_stage(size, rng));
    if codec == BlockCodec::Checksum {
        pipeline = pipeline.then(CtrStage::new(key, 0));
    }
    Ok(pipeline.then_boxed(codec.encoder(Some(key), 0)?))
}

/// Stages turning the fetched bytes of `plan` into the requested plaintext
pub fn read_pipeline(key: &FileKey, codec: BlockCodec, plan: &ReadPlan) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new()
        .then(RightTruncate::new(plan.encoded_len))
        .then_boxed(codec.decoder(Some(key), plan.blocks.start)?);
    if codec == BlockCodec::Checksum {
        pipeline = pipeline.then(CtrStage::new(
            key,
            plan.blocks.start * codec.decoded_block_size(),
        ));
    }
    Ok(pipeline
        .then(LeftTruncate::new(plan.skip))
        .then(RightTruncate::new(plan.take)))
}

/// Stores and retrieves whole files by name
pub struct FileStore {
    records: Arc<dyn RecordStore>,
    chunk_stores: HashMap<String, ChunkStore>,
    default_store: String,
    options: WriteOptions,
    rng: Arc<dyn RandomSource>,
}

impl FileStore {
    /// Create a file store writing new chunks to `chunk_store` under `store_name`
    pub fn new(
        records: Arc<dyn RecordStore>,
        store_name: impl Into<String>,
        chunk_store: ChunkStore,
        options: WriteOptions,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let ebs = options.codec.encoded_block_size();
        if options.chunk_size_limit == 0 || options.chunk_size_limit % ebs != 0 {
            return Err(CoreError::Configuration(format!(
                "chunk size limit {} is not a positive multiple of {ebs}",
                options.chunk_size_limit
            )));
        }
        let default_store = store_name.into();
        let mut chunk_stores = HashMap::new();
        chunk_stores.insert(default_store.clone(), chunk_store);
        Ok(Self {
            records,
            chunk_stores,
            default_store,
            options,
            rng,
        })
    }

    /// Register another chunk store that existing records may refer to
    pub fn with_chunk_store(mut self, name: impl Into<String>, store: ChunkStore) -> Self {
        self.chunk_stores.insert(name.into(), store);
        self
    }

    fn chunk_store(&self, name: &str) -> Result<&ChunkStore> {
        self.chunk_stores
            .get(name)
            .ok_or_else(|| CoreError::Configuration(format!("unknown chunk store {name:?}")))
    }

    /// Look up a file's record
    pub async fn info(&self, name: &str) -> Result<FileRecord> {
        self.records
            .get(name)
            .await?
            .ok_or_else(|| CoreError::FileNotFound(name.to_string()))
    }

    /// Store `size` bytes from `source` as `name`
    ///
    /// The source must produce exactly `size` bytes. Chunks uploaded before a
    /// failure are left in place.
    #[instrument(skip(self, source))]
    pub async fn write_file(&self, name: &str, size: u64, source: SourceStream) -> Result<FileRecord> {
        validate_name(name)?;
        if self.records.get(name).await?.is_some() {
            return Err(CoreError::FileExists(name.to_string()));
        }

        let record = if size <= self.options.inline_threshold {
            self.collect_inline(size, source).await?
        } else {
            self.write_chunked(size, source).await?
        };

        if let Err(e) = self.records.put(name, &record).await {
            if let FileStorage::Chunked { chunk_store, chunks, .. } = record.storage() {
                warn!(name, error = %e, "Record write failed, removing uploaded chunks");
                self.chunk_store(chunk_store)?.delete_chunks(chunks).await;
            }
            return Err(e);
        }

        info!(
            name,
            size,
            inline = record.is_inline(),
            chunks = record.chunks().len(),
            stored = record.stored_len(),
            "Stored file"
        );
        Ok(record)
    }

    /// Store an in-memory buffer as `name`
    pub async fn write_bytes(&self, name: &str, data: impl Into<Bytes>) -> Result<FileRecord> {
        let data = data.into();
        let size = data.len() as u64;
        self.write_file(name, size, stream::once(async move { Ok(data) }).boxed())
            .await
    }

    async fn collect_inline(&self, size: u64, source: SourceStream) -> Result<FileRecord> {
        let checked = Pipeline::new()
            .then(ExpectLength::new(size))
            .into_stream(source.map_err(CoreError::from).boxed());
        let content: BytesMut = checked
            .try_fold(BytesMut::new(), |mut acc, piece| async move {
                acc.extend_from_slice(&piece);
                Ok(acc)
            })
            .await?;
        Ok(FileRecord::inline(content.freeze()))
    }

    async fn write_chunked(&self, size: u64, source: SourceStream) -> Result<FileRecord> {
        let codec = self.options.codec;
        let key = FileKey::generate(self.rng.as_ref());
        let pipeline = write_pipeline(&key, codec, size, self.rng.as_ref())?;
        debug!(stages = ?pipeline.stage_names(), "Built write pipeline");

        let encoded = pipeline.into_stream(source.map_err(ChunkStoreError::from).boxed());
        let mut slicer = StreamSlicer::new(encoded);
        let expected = codec.encoded_len(conceal_size(size));

        let store = self.chunk_store(&self.default_store)?;
        let outcome = store
            .write_chunks(self.options.chunk_size_limit, Some(expected), &mut slicer)
            .await?;

        match FileRecord::chunked(size, key, codec, self.default_store.clone(), outcome.chunks.clone()) {
            Ok(record) => Ok(record),
            Err(e) => {
                store.delete_chunks(&outcome.chunks).await;
                Err(e)
            }
        }
    }

    /// Read `range` of `name` (the whole file when `None`)
    ///
    /// Bytes past the end are clipped; a start past the end is an error.
    #[instrument(skip(self))]
    pub async fn read_file(&self, name: &str, range: Option<Range<u64>>) -> Result<FileStream> {
        let record = self.info(name).await?;
        self.read_record(&record, range)
    }

    /// Read `range` of the file described by `record`
    pub fn read_record(&self, record: &FileRecord, range: Option<Range<u64>>) -> Result<FileStream> {
        match record.storage() {
            FileStorage::Inline { content, crc32c } => {
                read_inline(content, *crc32c, record.size(), range)
            }
            FileStorage::Chunked {
                key,
                codec,
                chunk_store,
                chunks,
            } => {
                let plan = plan_read(chunks, BlockLayout::from(codec), record.size(), range)?;
                if plan.is_empty() {
                    return Ok(stream::empty().boxed());
                }
                debug!(
                    blocks = ?plan.blocks,
                    chunks = plan.reads.len(),
                    encoded_len = plan.encoded_len,
                    "Planned read"
                );

                let pipeline = read_pipeline(key, *codec, &plan)?;
                let fetched = self
                    .chunk_store(chunk_store)?
                    .read_chunks(plan.reads, true)
                    .map_err(CoreError::from)
                    .boxed();
                Ok(pipeline.into_stream(fetched))
            }
        }
    }

    /// Read a range into memory
    pub async fn read_to_vec(&self, name: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let stream = self.read_file(name, range).await?;
        stream
            .try_fold(Vec::new(), |mut acc, piece| async move {
                acc.extend_from_slice(&piece);
                Ok(acc)
            })
            .await
    }

    /// Remove a file's record and then its chunks
    #[instrument(skip(self))]
    pub async fn delete_file(&self, name: &str) -> Result<FileRecord> {
        let record = self.info(name).await?;
        self.records.remove(name).await?;
        if let FileStorage::Chunked { chunk_store, chunks, .. } = record.storage() {
            self.chunk_store(chunk_store)?.delete_chunks(chunks).await;
        }
        info!(name, chunks = record.chunks().len(), "Deleted file");
        Ok(record)
    }
}

fn read_inline(
    content: &Bytes,
    crc32c: [u8; 4],
    size: u64,
    range: Option<Range<u64>>,
) -> Result<FileStream> {
    let Range { start, end } = match range {
        None => {
            let actual = crc32c_bytes(content);
            if actual != crc32c {
                return Err(CoreError::Integrity(format!(
                    "inline content crc32c {} does not match recorded {}",
                    hex::encode(actual),
                    hex::encode(crc32c)
                )));
            }
            0..size
        }
        Some(r) => r,
    };
    if start > size {
        return Err(CoreError::RangeOutOfBounds { start, size });
    }
    let end = end.min(size);
    if start >= end {
        return Ok(stream::empty().boxed());
    }
    let slice = content.slice(start as usize..end as usize);
    Ok(stream::once(async move { Ok(slice) }).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryRecordStore;
    use strata_chunkstore::{ChunkInfo, MemoryBackend, RetryPolicy};
    use strata_crypto::SeededRandom;

    fn file_store(backend: &MemoryBackend, codec: BlockCodec, limit_blocks: u64) -> FileStore {
        let rng: Arc<dyn RandomSource> = Arc::new(SeededRandom::new(42));
        let chunks = ChunkStore::new(Arc::new(backend.clone()), RetryPolicy::immediate(), rng.clone());
        FileStore::new(
            Arc::new(MemoryRecordStore::new()),
            "mem",
            chunks,
            WriteOptions {
                inline_threshold: 64,
                codec,
                chunk_size_limit: limit_blocks * codec.encoded_block_size(),
            },
            rng,
        )
        .unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_pipeline_stage_order() {
        let key = FileKey::from_bytes(&[1u8; 16]).unwrap();
        let rng = SeededRandom::new(0);
        let plan = ReadPlan {
            range: 10..20,
            blocks: 0..1,
            reads: Vec::new(),
            encoded_len: 100,
            skip: 10,
            take: 10,
        };

        let gcm = BlockCodec::Gcm { block_size: 64 };
        assert_eq!(
            write_pipeline(&key, gcm, 10, &rng).unwrap().stage_names(),
            vec!["expect-length", "pad-to", "gcm-encode"]
        );
        assert_eq!(
            read_pipeline(&key, gcm, &plan).unwrap().stage_names(),
            vec!["right-truncate", "gcm-decode", "left-truncate", "right-truncate"]
        );

        let crc = BlockCodec::Checksum;
        assert_eq!(
            write_pipeline(&key, crc, 10, &rng).unwrap().stage_names(),
            vec!["expect-length", "pad-to", "aes-ctr", "crc32c-encode"]
        );
        assert_eq!(
            read_pipeline(&key, crc, &plan).unwrap().stage_names(),
            vec!["right-truncate", "crc32c-decode", "aes-ctr", "left-truncate", "right-truncate"]
        );
    }

    #[test]
    fn test_rejects_unaligned_chunk_limit() {
        let backend = MemoryBackend::new();
        let rng: Arc<dyn RandomSource> = Arc::new(SeededRandom::new(1));
        let result = FileStore::new(
            Arc::new(MemoryRecordStore::new()),
            "mem",
            ChunkStore::new(Arc::new(backend), RetryPolicy::immediate(), rng.clone()),
            WriteOptions {
                inline_threshold: 0,
                codec: BlockCodec::Gcm { block_size: 64 },
                chunk_size_limit: 100,
            },
            rng,
        );
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_reads_from_registered_chunk_store() {
        let rng: Arc<dyn RandomSource> = Arc::new(SeededRandom::new(9));
        let records = Arc::new(MemoryRecordStore::new());
        let codec = BlockCodec::Gcm { block_size: 64 };
        let options = WriteOptions {
            inline_threshold: 64,
            codec,
            chunk_size_limit: 2 * codec.encoded_block_size(),
        };
        let store_on = |backend: &MemoryBackend| {
            ChunkStore::new(Arc::new(backend.clone()), RetryPolicy::immediate(), rng.clone())
        };

        let old_backend = MemoryBackend::new();
        let old = FileStore::new(records.clone(), "old", store_on(&old_backend), options, rng.clone())
            .unwrap();
        let data = sample(700);
        old.write_bytes("legacy", data.clone()).await.unwrap();

        let new_backend = MemoryBackend::new();
        let unregistered =
            FileStore::new(records.clone(), "new", store_on(&new_backend), options, rng.clone())
                .unwrap();
        assert!(matches!(
            unregistered.read_to_vec("legacy", None).await,
            Err(CoreError::Configuration(_))
        ));

        let store = FileStore::new(records, "new", store_on(&new_backend), options, rng.clone())
            .unwrap()
            .with_chunk_store("old", store_on(&old_backend));
        assert_eq!(store.read_to_vec("legacy", Some(100..600)).await.unwrap(), data[100..600].to_vec());

        let fresh = store.write_bytes("fresh", sample(300)).await.unwrap();
        assert!(matches!(fresh.storage(), FileStorage::Chunked { chunk_store, .. } if chunk_store == "new"));
        assert_eq!(new_backend.len(), fresh.chunks().len());

        store.delete_file("legacy").await.unwrap();
        assert!(old_backend.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_inline_roundtrip() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 4);
        let record = store.write_bytes("small", b"hello inline".to_vec()).await.unwrap();
        assert!(record.is_inline());
        assert!(backend.is_empty());

        assert_eq!(store.read_to_vec("small", None).await.unwrap(), b"hello inline");
        assert_eq!(store.read_to_vec("small", Some(6..100)).await.unwrap(), b"inline");
        assert!(store.read_to_vec("small", Some(13..14)).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_chunked_roundtrip_and_ranges() {
        let backend = MemoryBackend::new();
        let codec = BlockCodec::Gcm { block_size: 64 };
        let store = file_store(&backend, codec, 3);
        let data = sample(1000);

        let record = store.write_bytes("big", data.clone()).await.unwrap();
        assert!(!record.is_inline());
        // 1000 conceals to 1008: 16 blocks of 80 stored bytes, three per chunk
        assert_eq!(record.stored_len(), codec.encoded_len(1008));
        assert_eq!(record.chunks().len(), 6);

        assert_eq!(store.read_to_vec("big", None).await.unwrap(), data);
        for (start, end) in [(0, 1), (63, 65), (100, 700), (990, 1000), (999, 5000)] {
            let got = store.read_to_vec("big", Some(start..end)).await.unwrap();
            assert_eq!(got, data[start as usize..(end as usize).min(1000)].to_vec());
        }
        assert!(store.read_to_vec("big", Some(1000..1001)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checksum_codec_is_encrypted() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Checksum, 1);
        let data = vec![b'A'; 20_000];
        let record = store.write_bytes("legacy", data.clone()).await.unwrap();

        let first: &ChunkInfo = &record.chunks()[0];
        let stored = backend.object(&first.file_id).unwrap();
        assert!(!stored.windows(64).any(|w| w.iter().all(|&b| b == b'A')));

        assert_eq!(store.read_to_vec("legacy", None).await.unwrap(), data);
        assert_eq!(
            store.read_to_vec("legacy", Some(8190..8200)).await.unwrap(),
            vec![b'A'; 10]
        );
    }

    #[tokio::test]
    async fn test_tampered_chunk_fails_read() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 100);
        let record = store.write_bytes("t", sample(500)).await.unwrap();
        backend.tamper(&record.chunks()[0].file_id, |d| d[40] ^= 1);

        let err = store.read_to_vec("t", Some(0..10)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadChunk);

        // Without a transport checksum the block tag catches it
        backend.omit_reported_checksums(true);
        let err = store.read_to_vec("t", Some(0..10)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadData);

        // A whole-file read checksums the chunk locally
        let err = store.read_to_vec("t", None).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadChunk);
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 2);
        let source = stream::iter(vec![Ok(Bytes::from(vec![0u8; 100]))]).boxed();
        let err = store.write_file("short", 200, source).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);
        assert!(store.info("short").await.is_err());
    }

    #[tokio::test]
    async fn test_existing_name_rejected() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 2);
        store.write_bytes("dup", vec![1u8; 10]).await.unwrap();
        assert!(matches!(
            store.write_bytes("dup", vec![1u8; 10]).await,
            Err(CoreError::FileExists(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_file_removes_chunks() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 2);
        store.write_bytes("gone", sample(700)).await.unwrap();
        assert!(!backend.is_empty());

        store.delete_file("gone").await.unwrap();
        assert!(backend.is_empty());
        assert!(matches!(
            store.read_file("gone", None).await,
            Err(CoreError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_range_fetches_nothing() {
        let backend = MemoryBackend::new();
        let store = file_store(&backend, BlockCodec::Gcm { block_size: 64 }, 2);
        store.write_bytes("f", sample(300)).await.unwrap();
        let before = backend.get_count();
        assert!(store.read_to_vec("f", Some(50..50)).await.unwrap().is_empty());
        assert_eq!(backend.get_count(), before);
    }
}
