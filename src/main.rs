//! Main entry point for the unzip-http CLI application.
//!
//! Lists or extracts entries of a ZIP archive given as an HTTP URL or a
//! local path.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use unzip_http::zip::EntryReport;
use unzip_http::{
    ArchiveHandle, BatchReport, Cli, DirectorySink, EntryOutcome, ExtractionEngine,
    HttpRangeFetcher, LocalFileFetcher, RangeFetcher,
};

/// Some requested pattern or entry failed; the rest were processed.
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.quiet > 0 { "error" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let fetcher = Arc::new(HttpRangeFetcher::with_options(&cli.file, cli.fetch_options()).await?);
        let code = process_zip(fetcher.clone(), cli).await?;

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {}",
                format_size(fetcher.transferred_bytes())
            );
        }
        Ok(code)
    } else {
        let fetcher = Arc::new(LocalFileFetcher::new(Path::new(&cli.file))?);
        process_zip(fetcher, cli).await
    }
}

/// Open the archive behind `fetcher` and list or extract as requested.
async fn process_zip<R: RangeFetcher + 'static>(fetcher: Arc<R>, cli: &Cli) -> Result<ExitCode> {
    let archive = ArchiveHandle::from_fetcher(fetcher, cli.extract_options()).await?;

    let outcome = if cli.wants_listing() {
        list_files(&archive, cli.verbose).map(|()| ExitCode::SUCCESS)
    } else {
        extract_files(&archive, cli).await
    };

    close_with(&archive, outcome).await
}

/// Close `archive` whatever `outcome` is, then hand the outcome back.
async fn close_with<R: RangeFetcher + ?Sized>(
    archive: &ArchiveHandle<R>,
    outcome: Result<ExitCode>,
) -> Result<ExitCode> {
    archive.close().await;
    outcome
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Table with sizes, compression ratio and timestamps
fn list_files<R: RangeFetcher + ?Sized>(archive: &ArchiveHandle<R>, verbose: bool) -> Result<()> {
    let entries = archive.list()?;

    if !verbose {
        for entry in &entries {
            println!("{}", entry.name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let dt = entry.modified;
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            dt.year,
            dt.month,
            dt.day,
            dt.hour,
            dt.minute,
            entry.name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
    if !archive.comment().is_empty() {
        println!("{}", String::from_utf8_lossy(archive.comment()));
    }

    Ok(())
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 {
        let saved = 100 - (compressed.saturating_mul(100) / uncompressed).min(100);
        format!("{:>4}%", saved)
    } else {
        "  0%".to_string()
    }
}

/// Extract the entries selected by the CLI patterns.
///
/// With `-p` every entry goes to stdout, one after another in archive
/// order; otherwise each entry becomes its own file.
async fn extract_files<R: RangeFetcher + ?Sized>(archive: &ArchiveHandle<R>, cli: &Cli) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let engine = ExtractionEngine::new(archive).with_cancellation(cancel);
    let report = if cli.pipe {
        let mut stdout = tokio::io::stdout();
        engine
            .extract_concatenated(cli.patterns.as_slice(), &mut stdout)
            .await?
    } else {
        let sink = DirectorySink {
            root: cli.extract_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            keep_paths: cli.keep_paths(),
            overwrite: cli.should_overwrite(),
        };
        engine.extract_to_dir(cli.patterns.as_slice(), &sink).await?
    };

    print_report(&report, cli);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

fn print_report(report: &BatchReport, cli: &Cli) {
    for failure in &report.pattern_failures {
        if !cli.is_very_quiet() {
            eprintln!("Error: {}", failure.error);
        }
    }

    for EntryReport { name, outcome } in &report.entries {
        match outcome {
            EntryOutcome::Extracted { path: Some(path), .. } if !cli.is_quiet() => {
                println!("  extracting: {} -> {}", name, path.display());
            }
            EntryOutcome::Skipped { reason } if !cli.is_quiet() => {
                eprintln!("Skipping: {} ({}, use -o to overwrite)", name, reason);
            }
            EntryOutcome::Failed(e) if !cli.is_very_quiet() => {
                eprintln!("Error extracting {}: {}", name, e);
            }
            _ => {}
        }
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
