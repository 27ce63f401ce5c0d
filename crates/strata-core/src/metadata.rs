//! Record stores: where file records are kept by name

use crate::{CoreError, FileRecord, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum file name length
pub const MAX_NAME_LEN: usize = 255;

/// Check that a name is usable as a record key and a file name
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CoreError::InvalidName(format!(
            "name must be 1 to {MAX_NAME_LEN} bytes"
        )));
    }
    if name.starts_with('.') {
        return Err(CoreError::InvalidName(format!("{name:?} starts with a dot")));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(CoreError::InvalidName(format!("{name:?} contains {c:?}")));
    }
    Ok(())
}

/// Storage for file records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by name
    async fn get(&self, name: &str) -> Result<Option<FileRecord>>;

    /// Store a record, replacing any previous one
    async fn put(&self, name: &str, record: &FileRecord) -> Result<()>;

    /// Remove a record; returns whether it existed
    async fn remove(&self, name: &str) -> Result<bool>;
}

/// Records held in memory
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, FileRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, name: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.get(name).map(|r| r.value().clone()))
    }

    async fn put(&self, name: &str, record: &FileRecord) -> Result<()> {
        validate_name(name)?;
        self.records.insert(name.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.records.remove(name).is_some())
    }
}

/// One JSON file per record in a directory
#[derive(Clone, Debug)]
pub struct DirRecordStore {
    dir: PathBuf,
}

impl DirRecordStore {
    /// Open (and create if needed) a record directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl RecordStore for DirRecordStore {
    async fn get(&self, name: &str) -> Result<Option<FileRecord>> {
        let path = self.path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, record: &FileRecord) -> Result<()> {
        let path = self.path(name)?;
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(name, path = %path.display(), "Wrote file record");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
