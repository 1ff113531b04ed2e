//! Finding the central directory from the archive's tail.
//!
//! The EOCD record is followed by at most 65535 bytes of comment, so one
//! read of `65535 + 22` bytes from the end always contains it.

use tracing::debug;

use crate::error::{Error, Result};
use crate::io::{ByteRange, RangeFetcher};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes read from the end of the archive to find the EOCD record.
pub const TAIL_WINDOW: u64 = MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64;

/// Where the central directory lives, as declared by the trailer records.
#[derive(Debug, Clone)]
pub struct DirectoryLocation {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    pub eocd_offset: u64,
    pub zip64: bool,
    pub comment: Vec<u8>,
}

impl DirectoryLocation {
    pub fn range(&self, size: u64) -> Result<Option<ByteRange>> {
        if self.cd_size == 0 {
            return Ok(None);
        }
        ByteRange::with_len(self.cd_offset, self.cd_size, size).map(Some)
    }
}

/// Position of the rightmost EOCD signature whose comment length field
/// matches exactly the bytes left in `window` after the fixed record.
///
/// A comment may itself contain the signature; such candidates are skipped
/// unless their own declared length happens to be consistent too.
pub fn find_eocd(window: &[u8]) -> Option<usize> {
    let last = window.len().checked_sub(EndOfCentralDirectory::SIZE)?;
    (0..=last).rev().find(|&i| {
        if &window[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
            return false;
        }
        let comment_len = u16::from_le_bytes([window[i + 20], window[i + 21]]) as usize;
        comment_len == window.len() - i - EndOfCentralDirectory::SIZE
    })
}

/// Reads the trailer records of an archive of known size.
pub struct DirectoryLocator<'a, R: RangeFetcher + ?Sized> {
    fetcher: &'a R,
    size: u64,
}

impl<'a, R: RangeFetcher + ?Sized> DirectoryLocator<'a, R> {
    pub fn new(fetcher: &'a R) -> Self {
        let size = fetcher.size();
        Self { fetcher, size }
    }

    pub async fn locate(&self) -> Result<DirectoryLocation> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::corrupt(format!(
                "{} bytes is too small to be a ZIP archive",
                self.size
            )));
        }

        let window_len = TAIL_WINDOW.min(self.size);
        let window_start = self.size - window_len;
        let window = self
            .fetcher
            .fetch(ByteRange::new(window_start, self.size, self.size)?)
            .await?;

        let pos = find_eocd(&window)
            .ok_or_else(|| Error::corrupt("no end of central directory record found"))?;
        let eocd = EndOfCentralDirectory::from_bytes(&window[pos..])?;
        let eocd_offset = window_start + pos as u64;
        let comment = window[pos + EndOfCentralDirectory::SIZE..].to_vec();
        debug!(eocd_offset, comment_len = comment.len(), "found end of central directory");

        let (cd_offset, cd_size, total_entries, trailer_start) = if eocd.is_zip64() {
            let locator = self.read_locator(&window, pos, eocd_offset).await?;
            let eocd64 = self.read_zip64_eocd(&locator).await?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                locator.eocd64_offset,
            )
        } else {
            if eocd.is_multi_disk() {
                return Err(Error::UnsupportedFeature("multi-disk archives".into()));
            }
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            )
        };

        let cd_end = cd_offset
            .checked_add(cd_size)
            .ok_or_else(|| Error::corrupt("central directory bounds overflow"))?;
        if cd_end > trailer_start {
            return Err(Error::corrupt(format!(
                "central directory {cd_offset}..{cd_end} overlaps the trailer at {trailer_start}"
            )));
        }

        debug!(cd_offset, cd_size, total_entries, zip64 = eocd.is_zip64(), "located central directory");
        Ok(DirectoryLocation {
            cd_offset,
            cd_size,
            total_entries,
            eocd_offset,
            zip64: eocd.is_zip64(),
            comment,
        })
    }

    /// The ZIP64 locator sits immediately before the regular EOCD.
    async fn read_locator(
        &self,
        window: &[u8],
        eocd_pos: usize,
        eocd_offset: u64,
    ) -> Result<Zip64EOCDLocator> {
        let locator_size = Zip64EOCDLocator::SIZE;
        let locator = if eocd_pos >= locator_size {
            Zip64EOCDLocator::from_bytes(&window[eocd_pos - locator_size..eocd_pos])?
        } else if eocd_offset >= locator_size as u64 {
            let range = ByteRange::new(eocd_offset - locator_size as u64, eocd_offset, self.size)?;
            Zip64EOCDLocator::from_bytes(&self.fetcher.fetch(range).await?)?
        } else {
            None
        };

        let locator = locator.ok_or_else(|| {
            Error::UnsupportedFeature(
                "end of central directory holds ZIP64 sentinels but no ZIP64 locator".into(),
            )
        })?;
        if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
            return Err(Error::UnsupportedFeature("multi-disk archives".into()));
        }
        Ok(locator)
    }

    async fn read_zip64_eocd(&self, locator: &Zip64EOCDLocator) -> Result<Zip64EOCD> {
        let range = ByteRange::with_len(locator.eocd64_offset, Zip64EOCD::MIN_SIZE as u64, self.size)?;
        let eocd64 = Zip64EOCD::from_bytes(&self.fetcher.fetch(range).await?)?;
        if eocd64.disk_number != 0
            || eocd64.disk_with_cd != 0
            || eocd64.disk_entries != eocd64.total_entries
        {
            return Err(Error::UnsupportedFeature("multi-disk archives".into()));
        }
        Ok(eocd64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryFetcher;
    use crate::zip::fixtures::ZipBuilder;

    async fn locate(data: Vec<u8>) -> Result<DirectoryLocation> {
        let fetcher = MemoryFetcher::new(data);
        DirectoryLocator::new(&fetcher).locate().await
    }

    #[tokio::test]
    async fn locates_directory_without_comment() {
        let data = ZipBuilder::new().stored("a.txt", b"hello").build();
        let location = locate(data.clone()).await.unwrap();
        assert_eq!(location.eocd_offset, data.len() as u64 - 22);
        assert_eq!(location.total_entries, 1);
        assert_eq!(location.cd_size, 46 + 5);
        assert!(location.comment.is_empty());
    }

    #[tokio::test]
    async fn small_archive_is_read_with_one_request() {
        let data = ZipBuilder::new().stored("a.txt", b"hello").build();
        assert!((data.len() as u64) < TAIL_WINDOW);
        let fetcher = MemoryFetcher::new(data);
        DirectoryLocator::new(&fetcher).locate().await.unwrap();
        assert_eq!(fetcher.requests(), 1);
    }

    #[tokio::test]
    async fn comment_containing_signature_does_not_mislead() {
        // A fake EOCD inside the comment declares a comment length that
        // does not reach the end of the file.
        let mut comment = b"note: PK\x05\x06".to_vec();
        comment.extend_from_slice(&[0u8; 16]);
        comment.extend_from_slice(&[7, 0]);
        comment.extend_from_slice(b" trailing words");

        let data = ZipBuilder::new()
            .stored("a.txt", b"hello")
            .comment(&comment)
            .build();
        let location = locate(data.clone()).await.unwrap();
        assert_eq!(
            location.eocd_offset,
            (data.len() - comment.len() - 22) as u64
        );
        assert_eq!(location.comment, comment);
        assert_eq!(location.total_entries, 1);
    }

    #[test]
    fn rightmost_consistent_candidate_wins() {
        let mut window = vec![0u8; 10];
        // Candidate at 10 with a 4-byte comment: consistent.
        window.extend_from_slice(b"PK\x05\x06");
        window.extend_from_slice(&[0u8; 16]);
        window.extend_from_slice(&4u16.to_le_bytes());
        // Its comment holds a truncated signature that would overrun.
        window.extend_from_slice(b"PK\x05\x06");
        assert_eq!(find_eocd(&window), Some(10));
    }

    #[test]
    fn no_candidate_in_short_window() {
        assert_eq!(find_eocd(b"PK\x05\x06"), None);
        assert_eq!(find_eocd(&[]), None);
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let err = locate(vec![0x42; 4096]).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");

        let err = locate(vec![0x42; 5]).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    }

    #[tokio::test]
    async fn empty_archive_has_no_directory_range() {
        let data = ZipBuilder::new().build();
        assert_eq!(data.len(), 22);
        let location = locate(data).await.unwrap();
        assert_eq!(location.total_entries, 0);
        assert_eq!(location.range(22).unwrap(), None);
    }

    #[tokio::test]
    async fn reads_zip64_trailer() {
        let data = ZipBuilder::new()
            .stored("a.txt", b"hello")
            .stored("b.txt", b"world")
            .zip64()
            .build();
        let location = locate(data).await.unwrap();
        assert!(location.zip64);
        assert_eq!(location.total_entries, 2);
        assert_eq!(location.cd_offset, 2 * (30 + 5 + 5));
        assert_eq!(location.cd_size, 2 * (46 + 5));
    }

    #[tokio::test]
    async fn zip64_sentinel_without_locator_is_unsupported() {
        let mut data = ZipBuilder::new().stored("a.txt", b"hello").build();
        let eocd = data.len() - 22;
        data[eocd + 16..eocd + 20].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        let err = locate(data).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)), "{err}");
    }

    #[tokio::test]
    async fn directory_overlapping_trailer_is_corrupt() {
        let mut data = ZipBuilder::new().stored("a.txt", b"hello").build();
        let eocd = data.len() - 22;
        data[eocd + 12..eocd + 16].copy_from_slice(&500u32.to_le_bytes());
        let err = locate(data).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    }
}
