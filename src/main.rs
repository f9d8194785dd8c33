//! Main entry point for the torrentzip CLI application.
//!
//! Packs files into TorrentZip archives, checks existing archives and lists
//! their contents.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use torrentzip::cli::{self, Command, CreateArgs, ListArgs, VerifyArgs};
use torrentzip::{Cli, Writer, WriterOptions, ZipReader, verify};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Command::Create(args) => create_archive(args).await,
        Command::Verify(args) => verify_archives(args).await,
        Command::List(args) => list_archive(&args),
    }
}

/// Log to stderr. `RUST_LOG` takes precedence over `-v`/`-q`.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn create_archive(args: CreateArgs) -> Result<ExitCode> {
    let output = args.output.clone();
    tokio::task::spawn_blocking(move || write_archive(&args))
        .await
        .context("archive task panicked")??;

    let digest = verify::hash_file(&output)
        .with_context(|| format!("failed to hash {}", output.display()))?;
    println!("finished creating zip file: {}", output.display());
    println!("sha256 of created zip file: {digest}");
    Ok(ExitCode::SUCCESS)
}

fn write_archive(args: &CreateArgs) -> Result<()> {
    let base = std::env::current_dir().context("cannot determine current directory")?;
    let inputs = cli::collect_inputs(&base, &args.inputs)?;

    let file = File::create(&args.output)
        .with_context(|| format!("creating zip file {} failed", args.output.display()))?;
    let options = WriterOptions {
        staging: args.staging(),
    };
    let mut zip = Writer::with_options(BufWriter::new(file), &options)
        .context("creating zip file writer failed")?;

    for input in &inputs {
        let mut entry = zip
            .create(&input.name)
            .with_context(|| format!("cannot create zip header for {}", input.name))?;
        if input.is_dir {
            continue;
        }
        let mut source = File::open(&input.path)
            .with_context(|| format!("opening file {} failed", input.path.display()))?;
        io::copy(&mut source, &mut entry)
            .with_context(|| format!("failed to write file {} into zip", input.path.display()))?;
    }

    let mut sink = zip
        .close()
        .with_context(|| format!("failed to close zip file {}", args.output.display()))?;
    sink.flush()
        .with_context(|| format!("failed to flush zip file {}", args.output.display()))?;
    tracing::info!(entries = inputs.len(), path = %args.output.display(), "archive written");
    Ok(())
}

async fn verify_archives(args: VerifyArgs) -> Result<ExitCode> {
    let options = args.options();
    if let Some(dir) = &options.fail_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let report = verify::verify_all(&args.roots, &options).await?;

    println!(
        "checked {} archives ({}), {} failed",
        report.checked,
        format_size(report.bytes),
        report.failed.len()
    );
    for path in &report.failed {
        println!("  FAILED: {}", path.display());
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// List the entries of an archive.
///
/// Supports two output formats:
/// - Simple format: just entry names, one per line
/// - Long format (`-l`): table with sizes, ratio, CRC32 and timestamps
fn list_archive(args: &ListArgs) -> Result<ExitCode> {
    let reader = ZipReader::open_path(&args.archive)
        .with_context(|| format!("cannot read {}", args.archive.display()))?;
    let entries = reader.entries();

    if args.long {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>8}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "CRC-32", "Date", "Time"
        );
        println!("{}", "-".repeat(80));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !args.long {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:08x}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            entry.crc32,
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if args.long {
        println!("{}", "-".repeat(80));
        println!(
            "{:>10}  {:>10}  {}  {:>31}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    if !reader.comment().is_empty() {
        println!("comment: {}", String::from_utf8_lossy(reader.comment()));
    }
    Ok(ExitCode::SUCCESS)
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
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
