//! Bulk import with a bounded worker pool
//!
//! A fixed number of workers pull files from a shared queue; each worker
//! drives one file to completion before taking the next. A failed file is
//! reported and does not stop the others.

use crate::{file_store::SourceStream, CoreError, FileStore, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Read size for file sources
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One file to import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportItem {
    pub path: PathBuf,
    pub name: String,
}

/// Outcome of a bulk import
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// `(name, size)` of every stored file
    pub imported: Vec<(String, u64)>,
    /// `(name, error)` of every failed file
    pub failed: Vec<(String, String)>,
}

impl ImportReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Parse an import list: one `path [name]` per line, `#` starts a comment
///
/// Without a name, the file name of the path is used.
pub fn parse_import_list(text: &str) -> Result<Vec<ImportItem>> {
    let mut items = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let path = PathBuf::from(parts.next().unwrap_or_default());
        let name = match parts.next() {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    CoreError::Configuration(format!("line {}: no file name in path", lineno + 1))
                })?,
        };
        if parts.next().is_some() {
            return Err(CoreError::Configuration(format!(
                "line {}: expected `path [name]`",
                lineno + 1
            )));
        }
        items.push(ImportItem { path, name });
    }
    Ok(items)
}

/// Open a local file as a byte stream, returning its size
pub async fn file_source(path: &Path) -> Result<(u64, SourceStream)> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let stream = stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        match file.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok::<Bytes, std::io::Error>(buf.freeze()), Some(file))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed();
    Ok((size, stream))
}

/// Import every item using at most `workers` concurrent transfers
pub async fn import_files(store: Arc<FileStore>, items: Vec<ImportItem>, workers: usize) -> ImportReport {
    let total = items.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let report = Arc::new(Mutex::new(ImportReport::default()));

    let mut tasks = JoinSet::new();
    for worker in 0..workers.max(1).min(total.max(1)) {
        let queue = queue.clone();
        let report = report.clone();
        let store = store.clone();
        tasks.spawn(async move {
            loop {
                let next = queue.lock().pop_front();
                let Some(item) = next else {
                    break;
                };
                match import_one(&store, &item).await {
                    Ok(size) => {
                        info!(worker, name = %item.name, size, "Imported file");
                        report.lock().imported.push((item.name, size));
                    }
                    Err(e) => {
                        warn!(worker, name = %item.name, path = %item.path.display(), error = %e, "Import failed");
                        report.lock().failed.push((item.name, e.to_string()));
                    }
                }
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Import worker panicked");
        }
    }

    let report = std::mem::take(&mut *report.lock());
    info!(
        total,
        imported = report.imported.len(),
        failed = report.failed.len(),
        "Import finished"
    );
    report
}

async fn import_one(store: &FileStore, item: &ImportItem) -> Result<u64> {
    let (size, source) = file_source(&item.path).await?;
    store.write_file(&item.name, size, source).await?;
    Ok(size)
}
