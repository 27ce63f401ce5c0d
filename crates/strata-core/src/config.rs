//! Engine configuration

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_chunkstore::RetryPolicy;
use strata_crypto::{BlockCodec, DEFAULT_BLOCK_SIZE};

/// Default inline threshold (2 KiB)
pub const DEFAULT_INLINE_THRESHOLD: u64 = 2048;

/// Default chunk size limit before block alignment (64 MiB)
pub const DEFAULT_CHUNK_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub storage: StorageConfig,
    pub codec: CodecConfig,
    pub retry: RetryPolicy,
    pub import: ImportConfig,
}

/// Where records and chunks live
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON record per file
    pub records_dir: PathBuf,
    /// Directory holding chunk objects
    pub chunks_dir: PathBuf,
    /// Name recorded for the chunk store in file records
    pub chunk_store: String,
    /// Files at or below this size are stored inline in their record
    pub inline_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_dir: PathBuf::from(".strata/records"),
            chunks_dir: PathBuf::from(".strata/chunks"),
            chunk_store: "local".to_string(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }
}

/// Framing of newly written files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// GCM block size; 0 selects checksum framing
    pub block_size: u32,
    /// Upper bound on a chunk object's size
    pub chunk_size_limit: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
        }
    }
}

/// Bulk import settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Files imported concurrently
    pub workers: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl StrataConfig {
    /// Load from an optional TOML file, then `STRATA__SECTION__KEY` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("STRATA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would otherwise fail deep inside a transfer
    pub fn validate(&self) -> Result<()> {
        self.block_codec()?;
        self.effective_chunk_size_limit()?;
        if self.storage.chunk_store.is_empty() {
            return Err(CoreError::Configuration("chunk store name is empty".to_string()));
        }
        if self.import.workers == 0 {
            return Err(CoreError::Configuration("import workers must be positive".to_string()));
        }
        if self.retry.upload_tries == 0 || self.retry.download_tries == 0 {
            return Err(CoreError::Configuration("retry tries must be positive".to_string()));
        }
        if self.retry.fetch_concurrency == 0 {
            return Err(CoreError::Configuration("fetch concurrency must be positive".to_string()));
        }
        let retry = &self.retry;
        let finite = retry.initial_delay_ms.is_finite()
            && retry.multiplier.is_finite()
            && retry.max_delay_ms.is_finite();
        if !finite
            || retry.initial_delay_ms < 0.0
            || retry.multiplier < 1.0
            || retry.max_delay_ms < retry.initial_delay_ms
        {
            return Err(CoreError::Configuration(format!(
                "bad backoff: initial {} ms, multiplier {}, max {} ms",
                retry.initial_delay_ms, retry.multiplier, retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Codec for newly written files
    pub fn block_codec(&self) -> Result<BlockCodec> {
        Ok(BlockCodec::from_block_size(self.codec.block_size)?)
    }

    /// Chunk size limit rounded down to whole encoded blocks
    pub fn effective_chunk_size_limit(&self) -> Result<u64> {
        let ebs = self.block_codec()?.encoded_block_size();
        let limit = self.codec.chunk_size_limit / ebs * ebs;
        if limit == 0 {
            return Err(CoreError::Configuration(format!(
                "chunk size limit {} is smaller than one {} byte block",
                self.codec.chunk_size_limit, ebs
            )));
        }
        Ok(limit)
    }
}
