use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::options::{ExtractOptions, FetchOptions};

#[derive(Parser, Debug)]
#[command(name = "unzip-http")]
#[command(version)]
#[command(about = "Extract files from a remote ZIP archive without downloading all of it", long_about = None)]
#[command(after_help = "Examples:\n  \
  unzip-http -l https://example.com/archive.zip          list files from remote ZIP\n  \
  unzip-http https://example.com/archive.zip '*.txt'     extract all .txt files\n  \
  unzip-http -p https://example.com/archive.zip a.txt    send a.txt to stdout")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Entries to extract, at most one '*' wildcard each (default: list)
    #[arg(value_name = "PATTERNS")]
    pub patterns: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Recreate folder structure from the archive when extracting
    #[arg(short = 'f')]
    pub recreate_paths: bool,

    /// Junk paths (do not make directories), overrides -f
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Verify CRC32 of extracted data
    #[arg(short = 't')]
    pub verify: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Entries fetched in parallel
    #[arg(long = "jobs", value_name = "N", default_value_t = 4)]
    pub jobs: usize,

    /// Retries per range request
    #[arg(long = "retries", value_name = "N", default_value_t = 3)]
    pub retries: u32,

    /// Timeout per HTTP request, in seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn wants_listing(&self) -> bool {
        self.list || self.verbose || self.patterns.is_empty()
    }

    pub fn keep_paths(&self) -> bool {
        self.recreate_paths && !self.junk_paths
    }

    pub fn should_overwrite(&self) -> bool {
        self.overwrite && !self.never_overwrite
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.timeout),
            max_retries: self.retries,
            ..Default::default()
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            concurrency: self.jobs,
            verify_crc: self.verify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_patterns_means_listing() {
        let cli = Cli::parse_from(["unzip-http", "https://example.com/a.zip"]);
        assert!(cli.is_http_url());
        assert!(cli.wants_listing());
    }

    #[test]
    fn extraction_flags_map_to_options() {
        let cli = Cli::parse_from([
            "unzip-http", "-t", "-o", "--jobs", "8", "--retries", "5", "archive.zip", "*.txt",
        ]);
        assert!(!cli.is_http_url());
        assert!(!cli.wants_listing());
        assert!(cli.should_overwrite());
        assert_eq!(cli.patterns, ["*.txt"]);

        let extract = cli.extract_options();
        assert_eq!(extract.concurrency, 8);
        assert!(extract.verify_crc);
        assert_eq!(cli.fetch_options().max_retries, 5);
    }

    #[test]
    fn never_overwrite_wins() {
        let cli = Cli::parse_from(["unzip-http", "-n", "-o", "a.zip", "x"]);
        assert!(!cli.should_overwrite());
    }

    #[test]
    fn paths_are_flattened_unless_recreated() {
        let flat = Cli::parse_from(["unzip-http", "a.zip", "x"]);
        assert!(!flat.keep_paths());
        let kept = Cli::parse_from(["unzip-http", "-f", "a.zip", "x"]);
        assert!(kept.keep_paths());
        let junked = Cli::parse_from(["unzip-http", "-f", "-j", "a.zip", "x"]);
        assert!(!junked.keep_paths());
    }
}
