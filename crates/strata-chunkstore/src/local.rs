//! Directory-backed chunk backend
//!
//! One file per chunk under a root directory. Uploads are written to a
//! temporary name and hard-linked into place, so a crashed upload never
//! leaves a partial object under its final name and an existing object is
//! never replaced.

use crate::{ChunkBackend, ChunkStoreError, FetchedObject, Result, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{instrument, warn};

/// A chunk backend storing objects as files in a directory
#[derive(Clone, Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open (and create if needed) a backend rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, file_id: &str) -> Result<PathBuf> {
        let valid = !file_id.is_empty()
            && file_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChunkStoreError::Configuration(format!(
                "invalid object name: {file_id:?}"
            )));
        }
        Ok(self.root.join(file_id))
    }
}

fn not_found(file_id: &str, e: std::io::Error) -> ChunkStoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ChunkStoreError::NotFound(file_id.to_string())
    } else {
        ChunkStoreError::Io(e)
    }
}

#[async_trait]
impl ChunkBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put_object(&self, name: &str, data: Bytes) -> Result<StoredObject> {
        let path = self.object_path(name)?;
        let tmp = self.root.join(format!(".{name}.partial"));

        let published = match tokio::fs::write(&tmp, &data).await {
            Ok(()) => tokio::fs::hard_link(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Failed to remove temporary object");
            }
        }
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ChunkStoreError::Backend(format!("object {name} already exists")));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(path = %path.display(), "Stored chunk object");
        Ok(StoredObject {
            file_id: name.to_string(),
            size: data.len() as u64,
            crc32c: Some(strata_crypto::crc32c_bytes(&data)),
            md5: Some(Md5::digest(&data).into()),
            account: None,
        })
    }

    #[instrument(skip(self))]
    async fn get_object(
        &self,
        file_id: &str,
        range: Option<Range<u64>>,
        _account: Option<&str>,
    ) -> Result<FetchedObject> {
        let path = self.object_path(file_id)?;
        match range {
            None => {
                let data = tokio::fs::read(&path).await.map_err(|e| not_found(file_id, e))?;
                let crc = strata_crypto::crc32c_bytes(&data);
                Ok(FetchedObject {
                    data: Bytes::from(data),
                    object_crc32c: Some(crc),
                })
            }
            Some(r) => {
                let mut file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| not_found(file_id, e))?;
                file.seek(std::io::SeekFrom::Start(r.start)).await?;
                let mut data = Vec::with_capacity(r.end.saturating_sub(r.start) as usize);
                file.take(r.end.saturating_sub(r.start))
                    .read_to_end(&mut data)
                    .await?;
                Ok(FetchedObject {
                    data: Bytes::from(data),
                    object_crc32c: None,
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, file_id: &str) -> Result<()> {
        let path = self.object_path(file_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
