//! # Strata Core
//!
//! File engine for the Strata encrypted chunk storage system.
//!
//! This crate provides:
//! - **File records**: Validated descriptions of inline and chunked files
//! - **Range planning**: Map a plaintext range to the blocks and chunk bytes holding it
//! - **Orchestration**: Write and read pipelines over the chunk store
//! - **Record stores**: In-memory and directory-backed record storage
//! - **Bulk import**: Bounded worker pool over many local files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            FileStore / Import           │
//! ├──────────────────┬──────────────────────┤
//! │   RecordStore    │   Range planning     │
//! ├──────────────────┴──────────────────────┤
//! │   Codecs (strata-crypto) │ ChunkStore   │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod file_store;
pub mod import;
pub mod metadata;
pub mod range;
pub mod record;

pub use config::{CodecConfig, ImportConfig, StorageConfig, StrataConfig};
pub use error::{CoreError, ErrorKind, Result};
pub use file_store::{read_pipeline, write_pipeline, FileStore, FileStream, SourceStream, WriteOptions};
pub use import::{file_source, import_files, parse_import_list, ImportItem, ImportReport};
pub use metadata::{validate_name, DirRecordStore, MemoryRecordStore, RecordStore};
pub use range::{chunk_block_ranges, plan_read, BlockLayout, ReadPlan};
pub use record::{FileRecord, FileStorage};
