//! Main entry point for the zipserve CLI application.
//!
//! `serve` runs the HTTP server; `cat`, `index` and `forget` operate on a
//! single archive against the same metadata cache.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use zipserve::cli::{CacheArgs, Command};
use zipserve::config::CACHE_DB_NAME;
use zipserve::{Cli, Encoding, IndexOutcome, Indexer, MetadataStore, Service, Streamer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Command::Serve(args) => Service::new(args.to_config())?.run().await,
        Command::Cat {
            archive,
            entry,
            cache,
        } => {
            let streamer = Streamer::new(open_indexer(&cache)?);
            tokio::task::spawn_blocking(move || {
                let mut stdout = std::io::stdout().lock();
                streamer.stream(Path::new(&archive), &entry, &mut stdout)
            })
            .await??;
            Ok(())
        }
        Command::Index {
            archive,
            verbose,
            cache,
        } => {
            let indexer = open_indexer(&cache)?;
            let quiet = cli.quiet > 0;
            tokio::task::spawn_blocking(move || {
                index_archive(&indexer, Path::new(&archive), verbose, quiet)
            })
            .await?
        }
        Command::Forget { archive, cache } => {
            let indexer = open_indexer(&cache)?;
            let removed =
                tokio::task::spawn_blocking(move || indexer.forget(Path::new(&archive))).await??;
            if cli.quiet == 0 {
                eprintln!("{}", if removed { "Removed from cache" } else { "Not cached" });
            }
            Ok(())
        }
    }
}

/// Initialize tracing on stderr so that `cat` output stays clean.
///
/// `RUST_LOG` takes precedence; otherwise `-q` lowers the level to warnings
/// and `-qq` to errors.
fn init_tracing(cli: &Cli) {
    let default = if cli.is_very_quiet() {
        "error"
    } else if cli.is_quiet() {
        "warn"
    } else {
        "info,zipserve=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn open_indexer(cache: &CacheArgs) -> Result<Arc<Indexer>> {
    let db_path = PathBuf::from(&cache.cache_dir).join(CACHE_DB_NAME);
    let store = MetadataStore::open(&db_path)?;
    Ok(Arc::new(Indexer::new(Arc::new(store))))
}

/// Index an archive if stale and print its cached entry table.
///
/// Supports two output formats:
/// - Simple format: just entry names, one per line
/// - Verbose format (`-v`): sizes, compression ratio and method
fn index_archive(indexer: &Indexer, archive: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let outcome = indexer.refresh(archive)?;
    let entries = indexer.store().list_entries(outcome.id())?;

    if !quiet {
        match outcome {
            IndexOutcome::Fresh(_) => eprintln!("Cache is up to date"),
            IndexOutcome::Built { entries, .. } => eprintln!("Indexed {} entries", entries),
        }
    }

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>8}  Name",
            "Length", "Size", "Cmpr", "Method"
        );
        println!("{}", "-".repeat(60));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;

    for entry in &entries {
        if verbose {
            println!(
                "{:>10}  {:>10}  {}  {:>8}  {}",
                entry.uncompressed_size,
                entry.compressed_size,
                ratio(entry.compressed_size, entry.uncompressed_size),
                method_name(entry.encoding),
                entry.name
            );
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
        } else {
            println!("{}", entry.name);
        }
    }

    if verbose {
        println!("{}", "-".repeat(60));
        println!(
            "{:>10}  {:>10}  {}  {:>8}  {} entries ({})",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            entries.len(),
            format_size(total_uncompressed)
        );
    }

    Ok(())
}

/// Compression ratio as percentage saved, right-aligned to five columns.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

fn method_name(encoding: Encoding) -> String {
    match encoding {
        Encoding::Stored => "stored".to_string(),
        Encoding::Deflate => "deflate".to_string(),
        Encoding::Unsupported(method) => format!("?{}", method),
    }
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
