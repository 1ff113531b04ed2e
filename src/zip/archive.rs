use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::io::{HttpRangeFetcher, RangeFetcher};
use crate::options::{ExtractOptions, FetchOptions};

use super::entry::{EntryReader, EntryStream, stream_error};
use super::index::ArchiveIndex;
use super::locator::DirectoryLocator;
use super::parser::CentralDirectoryParser;
use super::structures::{CentralDirectoryEntry, EntrySummary};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// An opened archive: its fetcher plus the central directory read once.
///
/// A handle only exists once opening succeeded, so a failed open leaves
/// nothing that could be used. After [`close`](Self::close) every operation
/// fails with [`Error::UseAfterClose`]. The index is never mutated, so
/// concurrent extractions only share the fetcher.
pub struct ArchiveHandle<R: RangeFetcher + ?Sized> {
    fetcher: Arc<R>,
    index: ArchiveIndex,
    comment: Vec<u8>,
    options: ExtractOptions,
    closed: AtomicBool,
    // Held shared by running operations, exclusively by close.
    gate: RwLock<()>,
}

impl ArchiveHandle<HttpRangeFetcher> {
    /// Open a remote archive with default options.
    pub async fn open(url: &str) -> Result<Self> {
        Self::open_with(url, FetchOptions::default(), ExtractOptions::default()).await
    }

    pub async fn open_with(url: &str, fetch: FetchOptions, extract: ExtractOptions) -> Result<Self> {
        let fetcher = HttpRangeFetcher::with_options(url, fetch).await?;
        Self::from_fetcher(Arc::new(fetcher), extract).await
    }
}

impl<R: RangeFetcher + ?Sized> ArchiveHandle<R> {
    /// Locate and parse the central directory behind `fetcher`.
    ///
    /// On failure the fetcher is closed and the error returned as is.
    pub async fn from_fetcher(fetcher: Arc<R>, options: ExtractOptions) -> Result<Self> {
        match Self::load(&*fetcher).await {
            Ok((index, comment)) => {
                debug!(entries = index.len(), size = fetcher.size(), "archive opened");
                Ok(Self {
                    fetcher,
                    index,
                    comment,
                    options,
                    closed: AtomicBool::new(false),
                    gate: RwLock::new(()),
                })
            }
            Err(e) => {
                fetcher.close();
                Err(e)
            }
        }
    }

    async fn load(fetcher: &R) -> Result<(ArchiveIndex, Vec<u8>)> {
        let location = DirectoryLocator::new(fetcher).locate().await?;
        let entries = CentralDirectoryParser::new(fetcher).read(&location).await?;
        Ok((ArchiveIndex::new(entries), location.comment))
    }

    pub fn fetcher(&self) -> &Arc<R> {
        &self.fetcher
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Total archive size in bytes.
    pub fn size(&self) -> u64 {
        self.fetcher.size()
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::UseAfterClose);
        }
        Ok(())
    }

    pub fn index(&self) -> Result<&ArchiveIndex> {
        self.ensure_open()?;
        Ok(&self.index)
    }

    /// Entry summaries in central directory order.
    pub fn list(&self) -> Result<Vec<EntrySummary>> {
        Ok(self.index()?.summaries())
    }

    pub fn select_by_pattern(&self, pattern: &str) -> Result<Vec<EntrySummary>> {
        Ok(self
            .index()?
            .select_by_pattern(pattern)?
            .into_iter()
            .map(CentralDirectoryEntry::summary)
            .collect())
    }

    /// Shared guard keeping [`close`](Self::close) out while an operation runs.
    pub(crate) async fn session(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read().await;
        self.ensure_open()?;
        Ok(guard)
    }

    pub(crate) fn entry_reader(&self) -> EntryReader<'_, R> {
        EntryReader::new(&*self.fetcher, self.options.verify_crc)
    }

    /// Whole decompressed contents of the entry called `name`.
    pub async fn extract(&self, name: &str) -> Result<Vec<u8>> {
        let _session = self.session().await?;
        let entry = self.index.lookup(name)?;
        info!(name, "extracting");
        self.entry_reader().read_to_vec(entry).await
    }

    /// Decompressing reader over the entry called `name`.
    pub async fn open_entry(&self, name: &str) -> Result<EntryStream> {
        let _session = self.session().await?;
        let entry = self.index.lookup(name)?;
        self.entry_reader().open(entry).await
    }

    /// Stream the entry called `name` into `sink`, returning the bytes written.
    ///
    /// Bytes are written as they are decompressed, so a late integrity
    /// failure can leave a prefix in `sink`.
    pub async fn extract_to_writer<W>(&self, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let _session = self.session().await?;
        let entry = self.index.lookup(name)?;
        let mut stream = self.entry_reader().open(entry).await?;

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let n = stream
                .read(&mut buf)
                .map_err(|e| stream_error(e, &entry.file_name))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    /// Release the transport. Waits for running operations; idempotent.
    pub async fn close(&self) {
        let _exclusive = self.gate.write().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.fetcher.close();
            debug!("archive closed");
        }
    }
}
