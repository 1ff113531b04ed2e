//! ZIP archive parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: binary records (EOCD, ZIP64 trailer, headers) and entry types
//! - [`locator`]: finds the central directory from a bounded tail window
//! - [`parser`]: parses the central directory records
//! - [`index`]: the parsed entries, name lookup and pattern selection
//! - [`entry`]: local header resolution and decompression of one entry
//! - [`archive`]: the opened-archive handle and its lifecycle
//! - [`engine`]: batch extraction into a concatenated sink or per-entry files
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! This implementation reads the EOCD first (from the end of the file),
//! then the Central Directory, so listing touches only the tail of the
//! file and extraction only the bytes of the selected entries.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

pub mod archive;
pub mod engine;
pub mod entry;
pub mod index;
pub mod locator;
pub mod parser;
pub mod structures;

#[cfg(test)]
pub(crate) mod fixtures;

pub use archive::ArchiveHandle;
pub use engine::{BatchReport, DirectorySink, EntryOutcome, EntryReport, ExtractionEngine, PatternFailure};
pub use entry::{EntryReader, EntryStream};
pub use index::{ArchiveIndex, Pattern};
pub use locator::{DirectoryLocation, DirectoryLocator};
pub use parser::CentralDirectoryParser;
pub use structures::*;
