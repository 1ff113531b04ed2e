mod http;
mod local;
mod memory;

pub use http::HttpRangeFetcher;
pub use local::LocalFileFetcher;
pub use memory::MemoryFetcher;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Half-open byte interval `[start, end)` over a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Build a range, checking `start < end <= size`.
    pub fn new(start: u64, end: u64, size: u64) -> Result<Self> {
        if start >= end || end > size {
            return Err(Error::corrupt(format!(
                "byte range {start}..{end} is outside a resource of {size} bytes"
            )));
        }
        Ok(Self { start, end })
    }

    /// Build the range of `len` bytes starting at `start`.
    pub fn with_len(start: u64, len: u64, size: u64) -> Result<Self> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::corrupt(format!("byte range at {start} overflows")))?;
        Self::new(start, end, size)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always false: construction guarantees `start < end`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` request header (inclusive end).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end - 1)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Random access to a remote or local resource of known size.
///
/// Implementations must be safe to call concurrently from several
/// extractions against the same archive.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Read exactly `range.len()` bytes.
    async fn fetch(&self, range: ByteRange) -> Result<Bytes>;

    /// Total size of the resource, discovered once.
    fn size(&self) -> u64;

    /// Release pooled resources. Later fetches fail with [`Error::UseAfterClose`].
    fn close(&self) {}
}
