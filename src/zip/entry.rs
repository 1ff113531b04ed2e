//! Reading one entry's data.
//!
//! The central directory only says where the local file header starts. The
//! local header's own name and extra lengths, which may differ from the
//! central ones, decide where the compressed bytes begin.

use std::io::{self, Cursor, Read};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::{ByteRange, RangeFetcher};

use super::structures::*;

/// Largest buffer reserved up front when the whole entry is read to memory.
const MAX_PREALLOC: u64 = 64 << 20;

/// Resolves and opens entries of one archive.
pub struct EntryReader<'a, R: RangeFetcher + ?Sized> {
    fetcher: &'a R,
    verify_crc: bool,
}

impl<'a, R: RangeFetcher + ?Sized> EntryReader<'a, R> {
    pub fn new(fetcher: &'a R, verify_crc: bool) -> Self {
        Self {
            fetcher,
            verify_crc,
        }
    }

    /// Absolute offset of the entry's compressed data.
    pub async fn data_offset(&self, entry: &CentralDirectoryEntry) -> Result<u64> {
        let size = self.fetcher.size();
        let range = ByteRange::with_len(entry.lfh_offset, LFH_SIZE as u64, size)?;
        let header = LocalFileHeader::from_bytes(&self.fetcher.fetch(range).await?)
            .map_err(|_| Error::corrupt(format!("bad local file header for '{}'", entry.file_name)))?;

        entry
            .lfh_offset
            .checked_add(header.data_offset())
            .filter(|offset| *offset <= size)
            .ok_or_else(|| {
                Error::corrupt(format!("data of '{}' starts past the end", entry.file_name))
            })
    }

    /// Fetch the entry's compressed bytes and return a decompressing reader.
    pub async fn open(&self, entry: &CentralDirectoryEntry) -> Result<EntryStream> {
        if entry.is_encrypted() {
            return Err(Error::UnsupportedFeature(format!(
                "'{}' is encrypted",
                entry.file_name
            )));
        }
        let method = entry.compression()?;

        let offset = self.data_offset(entry).await?;
        let payload = if entry.compressed_size == 0 {
            Bytes::new()
        } else {
            let range = ByteRange::with_len(offset, entry.compressed_size, self.fetcher.size())?;
            self.fetcher.fetch(range).await?
        };
        debug!(
            name = %entry.file_name,
            offset,
            compressed = entry.compressed_size,
            ?method,
            "fetched entry data"
        );

        let decoder = match method {
            CompressionMethod::Stored => Decoder::Stored(Cursor::new(payload)),
            CompressionMethod::Deflate => Decoder::Deflate(DeflateDecoder::new(Cursor::new(payload))),
        };

        Ok(EntryStream {
            name: entry.file_name.clone(),
            decoder,
            check: self.verify_crc.then(|| Integrity::new(entry)),
        })
    }

    /// Whole decompressed contents of the entry.
    pub async fn read_to_vec(&self, entry: &CentralDirectoryEntry) -> Result<Vec<u8>> {
        let mut stream = self.open(entry).await?;
        let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
        stream
            .read_to_end(&mut out)
            .map_err(|e| stream_error(e, &entry.file_name))?;
        Ok(out)
    }
}

enum Decoder {
    Stored(Cursor<Bytes>),
    Deflate(DeflateDecoder<Cursor<Bytes>>),
}

impl Read for Decoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Stored(r) => r.read(buf),
            Decoder::Deflate(r) => r.read(buf),
        }
    }
}

struct Integrity {
    hasher: crc32fast::Hasher,
    expected_crc: u32,
    expected_size: u64,
    seen: u64,
    finished: bool,
}

impl Integrity {
    fn new(entry: &CentralDirectoryEntry) -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            seen: 0,
            finished: false,
        }
    }

    fn update(&mut self, chunk: &[u8]) -> std::result::Result<(), String> {
        self.hasher.update(chunk);
        self.seen += chunk.len() as u64;
        if self.seen > self.expected_size {
            return Err(format!(
                "more than the declared {} bytes decompressed",
                self.expected_size
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> std::result::Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.seen != self.expected_size {
            return Err(format!(
                "decompressed {} bytes, expected {}",
                self.seen, self.expected_size
            ));
        }
        let actual = self.hasher.clone().finalize();
        if actual != self.expected_crc {
            return Err(format!(
                "CRC32 {actual:08x} does not match stored {:08x}",
                self.expected_crc
            ));
        }
        Ok(())
    }
}

/// Decompressed bytes of one entry.
///
/// With verification enabled, reading past the end checks length and
/// CRC32; a mismatch surfaces as an [`io::ErrorKind::InvalidData`] error
/// wrapping [`Error::DataIntegrity`].
pub struct EntryStream {
    name: String,
    decoder: Decoder,
    check: Option<Integrity>,
}

impl EntryStream {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder.read(buf)?;
        if let Some(check) = &mut self.check {
            let outcome = if n == 0 {
                check.finish()
            } else {
                check.update(&buf[..n])
            };
            outcome.map_err(|detail| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    Error::DataIntegrity {
                        name: self.name.clone(),
                        detail,
                    },
                )
            })?;
        }
        Ok(n)
    }
}

/// Turn an error raised while reading an [`EntryStream`] back into an [`Error`].
pub(crate) fn stream_error(e: io::Error, name: &str) -> Error {
    if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(inner) = e.into_inner() {
            if let Ok(err) = inner.downcast::<Error>() {
                return *err;
            }
        }
        return Error::DataIntegrity {
            name: name.to_string(),
            detail: "unreadable stream".into(),
        };
    }
    Error::DataIntegrity {
        name: name.to_string(),
        detail: format!("decompression failed: {e}"),
    }
}
