//! Chunk write, read and delete against a [`ChunkBackend`]
//!
//! Writes pull bounded slices from a [`ChunkSource`] and upload each one
//! under a fresh random name, retrying failed uploads with backoff and
//! re-requesting the same slice from the source. A failed
//! upload may still have landed server side, so a retry never reuses the
//! name; the orphan is left behind rather than risking a duplicate.
//!
//! Reads fetch the requested byte ranges concurrently and yield them in
//! chunk order, verifying whole-chunk checksums whenever one is available.

use crate::{
    retry::{retry_when, RetryPolicy},
    ChunkBackend, ChunkInfo, ChunkRead, ChunkSource, ChunkStoreError, Result,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_crypto::{random_name, RandomSource};
use tracing::{debug, info, instrument, warn};

/// Result of a chunked write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes consumed from the source
    pub total_bytes: u64,
    pub chunks: Vec<ChunkInfo>,
}

/// Chunk protocol over a backend
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkBackend>,
    policy: RetryPolicy,
    rng: Arc<dyn RandomSource>,
}

impl ChunkStore {
    pub fn new(
        backend: Arc<dyn ChunkBackend>,
        policy: RetryPolicy,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            backend,
            policy,
            rng,
        }
    }

    /// Upload `source` as a sequence of chunks of at most `chunk_size_limit` bytes
    ///
    /// When `expected_total` is given, the bytes written must match it
    /// exactly; a mismatch is an integrity failure and is not retried.
    #[instrument(skip(self, source), fields(backend = self.backend.name()))]
    pub async fn write_chunks(
        &self,
        chunk_size_limit: u64,
        expected_total: Option<u64>,
        source: &mut dyn ChunkSource,
    ) -> Result<WriteOutcome> {
        if chunk_size_limit == 0 {
            return Err(ChunkStoreError::Configuration(
                "chunk size limit must be positive".to_string(),
            ));
        }
        let max_len = usize::try_from(chunk_size_limit).map_err(|_| {
            ChunkStoreError::Configuration(format!("chunk size limit {chunk_size_limit} too large"))
        })?;

        let mut chunks: Vec<ChunkInfo> = Vec::new();
        let mut total_bytes = 0u64;
        let mut decayer = self.policy.decayer();

        while let Some(first) = source.next_slice(max_len, false).await? {
            let idx = chunks.len() as u32;
            let attempts = AtomicUsize::new(0);
            let retry_source = tokio::sync::Mutex::new(&mut *source);

            let (info, written) = retry_when(
                || {
                    let again = attempts.fetch_add(1, Ordering::Relaxed) > 0;
                    let first = first.clone();
                    let retry_source = &retry_source;
                    async move {
                        let slice = if again {
                            retry_source
                                .lock()
                                .await
                                .next_slice(max_len, true)
                                .await?
                                .ok_or_else(|| {
                                    ChunkStoreError::Integrity(
                                        "source lost the slice being retried".to_string(),
                                    )
                                })?
                        } else {
                            first
                        };
                        let written = slice.len() as u64;
                        let info = self.upload_chunk(idx, slice).await?;
                        Ok::<_, ChunkStoreError>((info, written))
                    }
                },
                ChunkStoreError::is_transient,
                |e, tries_left| warn!(idx, error = %e, tries_left, "Chunk upload failed"),
                self.policy.upload_tries.max(1),
                &mut decayer,
            )
            .await?;

            debug!(idx, size = info.size, file_id = %info.file_id, "Uploaded chunk");
            total_bytes += written;
            chunks.push(info);
            decayer.reset();
        }

        let chunk_total: u64 = chunks.iter().map(|c| c.size).sum();
        if chunk_total != total_bytes {
            return Err(ChunkStoreError::Integrity(format!(
                "chunk sizes sum to {chunk_total} but {total_bytes} bytes were written"
            )));
        }
        if let Some(expected) = expected_total {
            if total_bytes != expected {
                return Err(ChunkStoreError::Integrity(format!(
                    "wrote {total_bytes} bytes, expected {expected}"
                )));
            }
        }

        info!(chunks = chunks.len(), total_bytes, "Chunked write complete");
        Ok(WriteOutcome {
            total_bytes,
            chunks,
        })
    }

    async fn upload_chunk(&self, idx: u32, data: Bytes) -> Result<ChunkInfo> {
        let name = random_name(self.rng.as_ref());
        let crc32c = strata_crypto::crc32c_bytes(&data);
        let size = data.len() as u64;

        let stored = self.backend.put_object(&name, data).await?;

        if stored.size != size {
            return Err(ChunkStoreError::UploadMismatch(format!(
                "chunk {idx}: sent {size} bytes, backend stored {}",
                stored.size
            )));
        }
        if let Some(reported) = stored.crc32c {
            if reported != crc32c {
                return Err(ChunkStoreError::UploadMismatch(format!(
                    "chunk {idx}: sent crc32c {}, backend reports {}",
                    hex::encode(crc32c),
                    hex::encode(reported)
                )));
            }
        }

        Ok(ChunkInfo {
            idx,
            file_id: stored.file_id,
            crc32c,
            md5: stored.md5,
            size,
            account: stored.account,
        })
    }

    /// Fetch the given chunk ranges, yielding their bytes in request order
    ///
    /// Up to `fetch_concurrency` fetches run at once. With `verify_whole`
    /// set, a whole-chunk fetch with no transport checksum is checksummed
    /// locally.
    pub fn read_chunks(
        &self,
        reads: Vec<ChunkRead>,
        verify_whole: bool,
    ) -> BoxStream<'static, Result<Bytes>> {
        let concurrency = self.policy.fetch_concurrency.max(1);
        let backend = self.backend.clone();
        let policy = self.policy.clone();

        stream::iter(reads)
            .map(move |read| fetch_chunk(backend.clone(), policy.clone(), read, verify_whole))
            .buffered(concurrency)
            .boxed()
    }

    /// Delete every chunk, logging failures instead of returning them
    pub async fn delete_chunks(&self, chunks: &[ChunkInfo]) {
        let deletions = chunks.iter().map(|chunk| async move {
            if let Err(e) = self.backend.delete_object(&chunk.file_id).await {
                warn!(idx = chunk.idx, file_id = %chunk.file_id, error = %e, "Failed to delete chunk");
            }
        });
        futures::future::join_all(deletions).await;
    }
}

/// Accounts to try for a chunk: the recorded one, otherwise every known one
fn candidate_accounts(backend: &dyn ChunkBackend, chunk: &ChunkInfo) -> Vec<Option<String>> {
    if let Some(account) = &chunk.account {
        return vec![Some(account.clone())];
    }
    let known = backend.accounts();
    if known.is_empty() {
        vec![None]
    } else {
        known.into_iter().map(Some).collect()
    }
}

async fn fetch_chunk(
    backend: Arc<dyn ChunkBackend>,
    policy: RetryPolicy,
    read: ChunkRead,
    verify_whole: bool,
) -> Result<Bytes> {
    if read.range.end > read.chunk.size || read.range.start > read.range.end {
        return Err(ChunkStoreError::Integrity(format!(
            "range {}..{} outside chunk {} of {} bytes",
            read.range.start, read.range.end, read.chunk.idx, read.chunk.size
        )));
    }
    if read.is_empty() {
        return Ok(Bytes::new());
    }

    let accounts = candidate_accounts(backend.as_ref(), &read.chunk);
    let max_tries = policy.download_tries.max(1) * accounts.len() as u32;
    let attempts = AtomicUsize::new(0);
    let mut decayer = policy.decayer();
    let idx = read.chunk.idx;

    retry_when(
        || {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            let account = accounts[n % accounts.len()].clone();
            let backend = backend.clone();
            let read = read.clone();
            async move { fetch_once(backend.as_ref(), &read, account.as_deref(), verify_whole).await }
        },
        |e: &ChunkStoreError| e.is_retryable_read(attempts.load(Ordering::Relaxed) < accounts.len()),
        |e, tries_left| warn!(idx, error = %e, tries_left, "Chunk fetch failed"),
        max_tries,
        &mut decayer,
    )
    .await
}

async fn fetch_once(
    backend: &dyn ChunkBackend,
    read: &ChunkRead,
    account: Option<&str>,
    verify_whole: bool,
) -> Result<Bytes> {
    let whole = read.is_whole();
    let range = (!whole).then(|| read.range.clone());
    let fetched = backend.get_object(&read.chunk.file_id, range, account).await?;

    if fetched.data.len() as u64 != read.len() {
        return Err(ChunkStoreError::ShortRead {
            idx: read.chunk.idx,
            expected: read.len(),
            actual: fetched.data.len() as u64,
        });
    }

    let actual = match fetched.object_crc32c {
        Some(reported) => Some(reported),
        None if whole && verify_whole => Some(strata_crypto::crc32c_bytes(&fetched.data)),
        None => None,
    };
    if let Some(actual) = actual {
        if actual != read.chunk.crc32c {
            return Err(ChunkStoreError::BadChunk {
                idx: read.chunk.idx,
                expected: hex::encode(read.chunk.crc32c),
                actual: hex::encode(actual),
            });
        }
    }
    Ok(fetched.data)
}
