//! Strata - encrypted, chunked file storage

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strata_cli::{describe, get, import, open_store, parse_range, put, rm};
use strata_core::StrataConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Store files as encrypted, size-concealed chunks")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding file records
    #[arg(long, env = "STRATA_RECORDS_DIR")]
    records_dir: Option<PathBuf>,

    /// Directory holding chunk objects
    #[arg(long, env = "STRATA_CHUNKS_DIR")]
    chunks_dir: Option<PathBuf>,

    /// GCM block size for new files (0 for checksum framing)
    #[arg(long, env = "STRATA_BLOCK_SIZE")]
    block_size: Option<u32>,

    /// Enable debug logging
    #[arg(short, long, env = "STRATA_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a local file under a name
    Put { path: PathBuf, name: String },

    /// Write a stored file to stdout or a file
    Get {
        name: String,
        /// Byte range START-END, end exclusive
        #[arg(long)]
        range: Option<String>,
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a stored file and its chunks
    Rm { name: String },

    /// Show a file's record
    Info { name: String },

    /// Store every file listed in a file, one `path [name]` per line
    Import {
        list: PathBuf,
        /// Concurrent transfers
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("strata={log_level},strata_core={log_level},strata_chunkstore={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = StrataConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.records_dir {
        config.storage.records_dir = dir;
    }
    if let Some(dir) = args.chunks_dir {
        config.storage.chunks_dir = dir;
    }
    if let Some(block_size) = args.block_size {
        config.codec.block_size = block_size;
    }

    let store = open_store(&config).await?;
    tracing::debug!(records = %config.storage.records_dir.display(), chunks = %config.storage.chunks_dir.display(), "Opened store");

    match args.command {
        Command::Put { path, name } => {
            let record = put(&store, &path, &name).await?;
            println!("{name}: {} bytes, {} chunks", record.size(), record.chunks().len());
        }
        Command::Get {
            name,
            range,
            output,
        } => {
            let range = range.as_deref().map(parse_range).transpose()?;
            let written = get(&store, &name, range, output.as_deref()).await?;
            tracing::info!(name, written, "Read file");
        }
        Command::Rm { name } => {
            rm(&store, &name).await?;
            println!("removed {name}");
        }
        Command::Info { name } => {
            let record = store.info(&name).await?;
            print!("{}", describe(&name, &record));
        }
        Command::Import { list, workers } => {
            let workers = workers.unwrap_or(config.import.workers);
            let report = import(Arc::new(store), &list, workers).await?;
            for (name, error) in &report.failed {
                eprintln!("failed: {name}: {error}");
            }
            println!(
                "imported {} files, {} failed",
                report.imported.len(),
                report.failed.len()
            );
            if !report.is_success() {
                anyhow::bail!("{} files failed to import", report.failed.len());
            }
        }
    }

    Ok(())
}
