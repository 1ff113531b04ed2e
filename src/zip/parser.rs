//! Central directory parsing.
//!
//! The whole directory is fetched with a single range request and parsed
//! from memory. Every record must start exactly where the previous one
//! ended, and the declared entry count must consume the declared size.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::RangeFetcher;

use super::locator::DirectoryLocation;
use super::structures::*;

/// Reads the central directory described by a [`DirectoryLocation`].
pub struct CentralDirectoryParser<'a, R: RangeFetcher + ?Sized> {
    fetcher: &'a R,
}

impl<'a, R: RangeFetcher + ?Sized> CentralDirectoryParser<'a, R> {
    pub fn new(fetcher: &'a R) -> Self {
        Self { fetcher }
    }

    pub async fn read(&self, location: &DirectoryLocation) -> Result<Vec<CentralDirectoryEntry>> {
        let data = match location.range(self.fetcher.size())? {
            Some(range) => self.fetcher.fetch(range).await?,
            None => Default::default(),
        };
        let entries = parse_records(&data, location.total_entries)?;
        debug!(entries = entries.len(), bytes = data.len(), "parsed central directory");
        Ok(entries)
    }
}

/// Parse exactly `total_entries` records spanning all of `data`.
pub fn parse_records(data: &[u8], total_entries: u64) -> Result<Vec<CentralDirectoryEntry>> {
    let capacity = total_entries.min((data.len() / CDFH_MIN_SIZE) as u64) as usize;
    let mut entries = Vec::with_capacity(capacity);
    let mut cursor = Cursor::new(data);

    for index in 0..total_entries {
        let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
            Error::CorruptArchive(msg) => {
                Error::corrupt(format!("central directory record {index}: {msg}"))
            }
            other => other,
        })?;
        entries.push(entry);
    }

    let consumed = cursor.position() as usize;
    if consumed != data.len() {
        return Err(Error::corrupt(format!(
            "{total_entries} declared entries end at byte {consumed} of a {} byte central directory",
            data.len()
        )));
    }

    Ok(entries)
}

/// Parse a Central Directory File Header from a cursor.
///
/// On success the cursor sits on the first byte after the record's
/// comment.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<CentralDirectoryEntry> {
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    if data.len() - start < CDFH_MIN_SIZE {
        return Err(Error::corrupt("directory ends inside a fixed header"));
    }
    if &data[start..start + 4] != CDFH_SIGNATURE {
        return Err(Error::corrupt("bad central directory header signature"));
    }
    cursor.set_position(start as u64 + 4);

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()?;

    let name_start = start + CDFH_MIN_SIZE;
    let extra_start = name_start + file_name_length;
    let comment_start = extra_start + extra_field_length;
    let record_end = comment_start + file_comment_length;
    if record_end > data.len() {
        return Err(Error::corrupt(format!(
            "variable fields run {} bytes past the end of the directory",
            record_end - data.len()
        )));
    }

    // Use lossy conversion to handle non-UTF8 filenames gracefully
    let file_name = String::from_utf8_lossy(&data[name_start..extra_start]).into_owned();
    let is_directory = file_name.ends_with('/');

    let sizes = Zip64Values::resolve(
        &data[extra_start..comment_start],
        uncompressed_size,
        compressed_size,
        lfh_offset,
    )?;

    cursor.set_position(record_end as u64);

    Ok(CentralDirectoryEntry {
        file_name,
        compression_method,
        flags,
        compressed_size: sizes.compressed_size,
        uncompressed_size: sizes.uncompressed_size,
        crc32,
        lfh_offset: sizes.lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}

/// Sizes and offset after applying a ZIP64 extended information field.
struct Zip64Values {
    uncompressed_size: u64,
    compressed_size: u64,
    lfh_offset: u64,
}

impl Zip64Values {
    /// Only the header fields holding the 32-bit sentinel are present in the
    /// extra field, in this fixed order.
    fn resolve(extra: &[u8], uncompressed: u32, compressed: u32, offset: u32) -> Result<Self> {
        let mut pending = [
            (uncompressed == ZIP64_SENTINEL_U32, uncompressed as u64),
            (compressed == ZIP64_SENTINEL_U32, compressed as u64),
            (offset == ZIP64_SENTINEL_U32, offset as u64),
        ];

        if pending.iter().any(|(needed, _)| *needed) {
            let block = find_extra_block(extra, ZIP64_EXTRA_ID)
                .ok_or_else(|| Error::corrupt("ZIP64 sentinel without a ZIP64 extra field"))?;
            let mut cursor = Cursor::new(block);
            for (_, value) in pending.iter_mut().filter(|(needed, _)| *needed) {
                *value = cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| Error::corrupt("ZIP64 extra field is too short"))?;
            }
        }

        Ok(Self {
            uncompressed_size: pending[0].1,
            compressed_size: pending[1].1,
            lfh_offset: pending[2].1,
        })
    }
}

/// Payload of the first extra block with `id`.
///
/// A malformed tail is tolerated: parsing just stops there.
fn find_extra_block(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let header_id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let field_size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let body = pos + 4;
        if body + field_size > extra.len() {
            return None;
        }
        if header_id == id {
            return Some(&extra[body..body + field_size]);
        }
        pos = body + field_size;
    }
    None
}
