//! # Strata Chunkstore
//!
//! Chunked object storage layer for the Strata encrypted storage engine.
//!
//! This crate provides:
//! - **Chunked writes**: Split an encoded stream into bounded chunks, upload
//!   each under a fresh random name, retry with exponential backoff
//! - **Range reads**: Fetch byte ranges of many chunks concurrently, in order
//! - **Verification**: Whole-chunk CRC-32C checks against the recorded value
//! - **Account fallback**: Retry reads under every account that might see a chunk
//! - **Backends**: Local directory and in-memory stores
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               File Store                │
//! ├─────────────────────────────────────────┤
//! │     ChunkStore (write/read/delete)      │
//! ├─────────────────────────────────────────┤
//! │           ChunkBackend Trait            │
//! ├────────────────────┬────────────────────┤
//! │    LocalBackend    │   MemoryBackend    │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_chunkstore::{BytesSlicer, ChunkStore, MemoryBackend, RetryPolicy};
//!
//! let store = ChunkStore::new(Arc::new(MemoryBackend::new()), RetryPolicy::default(), rng);
//! let outcome = store.write_chunks(64 << 20, None, &mut BytesSlicer::new(data)).await?;
//! ```

pub mod chunk;
pub mod error;
pub mod local;
pub mod memory;
pub mod protocol;
pub mod retry;
pub mod slicer;

pub use chunk::{validate_chunk_list, ChunkInfo, ChunkRead, FetchedObject, StoredObject};
pub use error::{ChunkStoreError, Result};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use protocol::{ChunkStore, WriteOutcome};
pub use retry::{retry_function, retry_when, Decayer, RetryPolicy};
pub use slicer::{BytesSlicer, ChunkSource, StreamSlicer};

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;

/// Trait for chunk storage backends
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Credential selectors usable for reads; empty for single-account backends
    fn accounts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Store an object under `name`, which is never reused
    async fn put_object(&self, name: &str, data: Bytes) -> Result<StoredObject>;

    /// Fetch an object, or the given byte range of it
    async fn get_object(
        &self,
        file_id: &str,
        range: Option<Range<u64>>,
        account: Option<&str>,
    ) -> Result<FetchedObject>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete_object(&self, file_id: &str) -> Result<()>;
}
