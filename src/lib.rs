//! # unzip-http
//!
//! Extract individual files from ZIP archives hosted on HTTP servers
//! without downloading the whole archive.
//!
//! ZIP keeps its directory at the end of the file. Using HTTP Range
//! requests, this crate reads only that tail to list the archive, then
//! fetches exactly the bytes of the entries asked for.
//!
//! ## Features
//!
//! - List and extract from HTTP/HTTPS URLs using Range requests
//! - The same API over local files or in-memory buffers
//! - ZIP64 archives (more than 65535 entries or larger than 4GB)
//! - STORED (uncompressed) and DEFLATE compression methods
//! - Selection by name patterns with a single `*` wildcard
//! - Optional CRC32 verification
//!
//! ## Example
//!
//! ```no_run
//! use unzip_http::{ArchiveHandle, ExtractionEngine};
//!
//! #[tokio::main]
//! async fn main() -> unzip_http::Result<()> {
//!     let archive = ArchiveHandle::open("https://example.com/archive.zip").await?;
//!
//!     for entry in archive.list()? {
//!         println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
//!     }
//!
//!     let readme = archive.extract("README.txt").await?;
//!     println!("{}", String::from_utf8_lossy(&readme));
//!
//!     let mut stdout = tokio::io::stdout();
//!     let report = ExtractionEngine::new(&archive)
//!         .extract_concatenated(&["docs/*.md"], &mut stdout)
//!         .await?;
//!     assert!(report.is_success());
//!
//!     archive.close().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod options;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{ByteRange, HttpRangeFetcher, LocalFileFetcher, MemoryFetcher, RangeFetcher};
pub use options::{ExtractOptions, FetchOptions};
pub use zip::{
    ArchiveHandle, ArchiveIndex, BatchReport, CentralDirectoryEntry, DirectorySink, DosDateTime,
    EntryOutcome, EntrySummary, ExtractionEngine, Pattern,
};

/// Open the archive at `url` with default options.
pub async fn open(url: &str) -> Result<ArchiveHandle<HttpRangeFetcher>> {
    ArchiveHandle::open(url).await
}
