//! # Strata CLI
//!
//! Command implementations behind the `strata` binary: store, fetch, inspect,
//! delete and bulk-import files against a local record directory and chunk
//! directory.

use anyhow::{bail, Context};
use futures::StreamExt;
use std::fmt::Write as _;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_chunkstore::{ChunkStore, LocalBackend};
use strata_core::{
    chunk_block_ranges, file_source, import_files, parse_import_list, DirRecordStore, FileRecord,
    FileStorage, FileStore, ImportReport, StrataConfig, WriteOptions,
};
use strata_crypto::OsRandom;
use tokio::io::AsyncWriteExt;

/// Open the file store described by `config`
pub async fn open_store(config: &StrataConfig) -> anyhow::Result<FileStore> {
    config.validate()?;
    let records = DirRecordStore::open(&config.storage.records_dir)
        .await
        .with_context(|| format!("opening record dir {}", config.storage.records_dir.display()))?;
    let backend = LocalBackend::open(&config.storage.chunks_dir)
        .await
        .with_context(|| format!("opening chunk dir {}", config.storage.chunks_dir.display()))?;

    let rng = Arc::new(OsRandom);
    let chunks = ChunkStore::new(Arc::new(backend), config.retry.clone(), rng.clone());
    Ok(FileStore::new(
        Arc::new(records),
        config.storage.chunk_store.clone(),
        chunks,
        WriteOptions::from_config(config)?,
        rng,
    )?)
}

/// Parse `a-b` (end exclusive), `a-` (to end of file) or `-b` (from start)
pub fn parse_range(s: &str) -> anyhow::Result<Range<u64>> {
    let Some((start, end)) = s.split_once('-') else {
        bail!("range must look like START-END, got {s:?}");
    };
    let start = if start.is_empty() {
        0
    } else {
        start.parse().with_context(|| format!("bad range start {start:?}"))?
    };
    let end = if end.is_empty() {
        u64::MAX
    } else {
        end.parse().with_context(|| format!("bad range end {end:?}"))?
    };
    Ok(start..end)
}

/// Store a local file
pub async fn put(store: &FileStore, path: &Path, name: &str) -> anyhow::Result<FileRecord> {
    let (size, source) = file_source(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(store.write_file(name, size, source).await?)
}

/// Write a file (or part of it) to `out`, or stdout when `None`
pub async fn get(
    store: &FileStore,
    name: &str,
    range: Option<Range<u64>>,
    out: Option<&Path>,
) -> anyhow::Result<u64> {
    let mut stream = store.read_file(name, range).await?;
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match out {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0u64;
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        writer.write_all(&piece).await?;
        written += piece.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

/// Delete a file
pub async fn rm(store: &FileStore, name: &str) -> anyhow::Result<FileRecord> {
    Ok(store.delete_file(name).await?)
}

/// Human-readable description of a file record
pub fn describe(name: &str, record: &FileRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name:    {name}");
    let _ = writeln!(out, "size:    {}", record.size());
    let _ = writeln!(out, "stored:  {}", record.stored_len());
    match record.storage() {
        FileStorage::Inline { crc32c, .. } => {
            let _ = writeln!(out, "storage: inline (crc32c {})", hex::encode(crc32c));
        }
        FileStorage::Chunked {
            codec,
            chunk_store,
            chunks,
            ..
        } => {
            let framing = match codec.block_size_field() {
                0 => "crc32c".to_string(),
                n => format!("aes-128-gcm, {n} byte blocks"),
            };
            let _ = writeln!(out, "storage: {} chunks in {chunk_store:?} ({framing})", chunks.len());
            let blocks = chunk_block_ranges(chunks, codec.encoded_block_size());
            for (chunk, blocks) in chunks.iter().zip(blocks) {
                let _ = writeln!(
                    out,
                    "  #{:<4} {:>12} bytes  blocks {:>6}..{:<6} crc32c {}  {}",
                    chunk.idx,
                    chunk.size,
                    blocks.start,
                    blocks.end,
                    hex::encode(chunk.crc32c),
                    chunk.file_id
                );
            }
        }
    }
    out
}

/// Import every file named in the list at `list_path`
pub async fn import(
    store: Arc<FileStore>,
    list_path: &Path,
    workers: usize,
) -> anyhow::Result<ImportReport> {
    let text = tokio::fs::read_to_string(list_path)
        .await
        .with_context(|| format!("reading import list {}", list_path.display()))?;
    let mut items = parse_import_list(&text)?;
    let base: PathBuf = list_path.parent().map(Path::to_path_buf).unwrap_or_default();
    for item in &mut items {
        if item.path.is_relative() {
            item.path = base.join(&item.path);
        }
    }
    Ok(import_files(store, items, workers).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("10-20", 10..20)]
    #[case("0-1", 0..1)]
    #[case("5-", 5..u64::MAX)]
    #[case("-7", 0..7)]
    fn test_parse_range(#[case] input: &str, #[case] expected: Range<u64>) {
        assert_eq!(parse_range(input).unwrap(), expected);
    }

    #[rstest]
    #[case("10")]
    #[case("a-b")]
    #[case("1-2-3")]
    fn test_parse_range_rejects(#[case] input: &str) {
        assert!(parse_range(input).is_err());
    }

    fn config(dir: &TempDir) -> StrataConfig {
        let mut config = StrataConfig::default();
        config.storage.records_dir = dir.path().join("records");
        config.storage.chunks_dir = dir.path().join("chunks");
        config.codec.block_size = 4096;
        config.codec.chunk_size_limit = 3 * 4112;
        config
    }

    #[tokio::test]
    async fn test_put_get_info_rm() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&config(&dir)).await.unwrap();

        let src = dir.path().join("input.bin");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let record = put(&store, &src, "input.bin").await.unwrap();
        assert_eq!(record.size(), 50_000);
        assert!(record.chunks().len() > 1);

        let out = dir.path().join("out.bin");
        let written = get(&store, "input.bin", Some(1000..2000), Some(&out)).await.unwrap();
        assert_eq!(written, 1000);
        assert_eq!(std::fs::read(&out).unwrap(), data[1000..2000].to_vec());

        let text = describe("input.bin", &store.info("input.bin").await.unwrap());
        assert!(text.contains("size:    50000"));
        assert!(text.contains("aes-128-gcm, 4096 byte blocks"));
        assert!(text.contains("blocks      0..3"));

        rm(&store, "input.bin").await.unwrap();
        assert!(store.info("input.bin").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path().join("chunks")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_import_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&config(&dir)).await.unwrap());
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![b'b'; 9000]).unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "a.txt\nb.txt bee\nnope.txt\n").unwrap();

        let report = import(store.clone(), &list, 2).await.unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.read_to_vec("bee", None).await.unwrap(), vec![b'b'; 9000]);
    }
}
