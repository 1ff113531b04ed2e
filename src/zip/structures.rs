use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

use crate::error::{Error, Result};

/// Value stored in a 16-bit field whose real value lives in a ZIP64 record.
pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;
/// Value stored in a 32-bit field whose real value lives in a ZIP64 record.
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// Compression methods this reader can decode.
///
/// Closed on purpose: any other method code is rejected when an entry is
/// opened, never when the directory is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
}

impl CompressionMethod {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflate),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_SENTINEL_U16
            || self.total_entries == ZIP64_SENTINEL_U16
            || self.cd_size == ZIP64_SENTINEL_U32
            || self.cd_offset == ZIP64_SENTINEL_U32
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0 || self.disk_entries != self.total_entries
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    /// `None` when `data` does not start with a locator signature.
    pub fn from_bytes(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Some(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        }))
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid ZIP64 end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Extra field id of the ZIP64 extended information block.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// General purpose flag bit marking an encrypted entry.
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// The fields of a local file header needed to find the entry's data.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: u16,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt("invalid local file header"));
        }

        let mut cursor = Cursor::new(&data[6..]);
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(20); // Offset 26 in the header: filename length
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            flags,
            compression_method,
            file_name_length,
            extra_field_length,
        })
    }

    /// Bytes from the start of the header to the start of the entry's data.
    pub fn data_offset(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// MS-DOS timestamp decoded into calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    pub fn from_dos(date: u16, time: u16) -> Self {
        Self {
            year: ((date >> 9) & 0x7F) + 1980,
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: ((time >> 11) & 0x1F) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// One record of the central directory, immutable once parsed.
#[derive(Debug, Clone)]
pub struct CentralDirectoryEntry {
    pub file_name: String,
    /// Raw method code; see [`CentralDirectoryEntry::compression`].
    pub compression_method: u16,
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl CentralDirectoryEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let dt = self.modified();
        (dt.year, dt.month, dt.day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let dt = self.modified();
        (dt.hour, dt.minute, dt.second)
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime::from_dos(self.last_mod_date, self.last_mod_time)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// The decoder for this entry, or [`Error::UnsupportedCompressionMethod`].
    pub fn compression(&self) -> Result<CompressionMethod> {
        CompressionMethod::from_code(self.compression_method).ok_or_else(|| {
            Error::UnsupportedCompressionMethod {
                name: self.file_name.clone(),
                method: self.compression_method,
            }
        })
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            name: self.file_name.clone(),
            uncompressed_size: self.uncompressed_size,
            compressed_size: self.compressed_size,
            modified: self.modified(),
            is_directory: self.is_directory,
        }
    }
}

/// What listing and selection report about an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub modified: DosDateTime,
    pub is_directory: bool,
}
