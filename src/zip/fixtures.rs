//! Hand-assembled archives for unit tests.
//!
//! Built byte by byte so tests can produce layouts a regular ZIP writer
//! never would: unknown methods, local extra fields that differ from the
//! central ones, comments holding signature bytes, ZIP64 trailers.

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;

/// 1980-01-01
const DOS_DATE: u16 = (1 << 5) | 1;

struct FixtureEntry {
    name: String,
    method: u16,
    flags: u16,
    crc32: u32,
    uncompressed_size: u32,
    payload: Vec<u8>,
    local_extra: Vec<u8>,
    central_extra: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct ZipBuilder {
    entries: Vec<FixtureEntry>,
    comment: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(name, 0, data, data)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        self.raw(name, 8, data, &compressed)
    }

    pub fn directory(self, name: &str) -> Self {
        self.raw(name, 0, b"", b"")
    }

    /// Entry whose data is `payload` as-is, declared with `method`.
    pub fn raw(mut self, name: &str, method: u16, data: &[u8], payload: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method,
            flags: 0,
            crc32: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
            payload: payload.to_vec(),
            local_extra: Vec::new(),
            central_extra: Vec::new(),
        });
        self
    }

    /// Give the last entry a local extra field that the central record lacks.
    pub fn local_extra(mut self, extra: &[u8]) -> Self {
        self.last().local_extra = extra.to_vec();
        self
    }

    pub fn central_extra(mut self, extra: &[u8]) -> Self {
        self.last().central_extra = extra.to_vec();
        self
    }

    pub fn crc32(mut self, crc32: u32) -> Self {
        self.last().crc32 = crc32;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.last().flags = flags;
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Write ZIP64 trailer records and sentinels in the classic EOCD.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    fn last(&mut self) -> &mut FixtureEntry {
        self.entries.last_mut().expect("no entry to modify")
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();

        for entry in &self.entries {
            offsets.push(out.len() as u32);
            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, 20);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0);
            put16(&mut out, DOS_DATE);
            put32(&mut out, entry.crc32);
            put32(&mut out, entry.payload.len() as u32);
            put32(&mut out, entry.uncompressed_size);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, entry.local_extra.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&entry.payload);
        }

        let cd_offset = out.len();
        for (entry, offset) in self.entries.iter().zip(&offsets) {
            out.extend_from_slice(b"PK\x01\x02");
            put16(&mut out, 20);
            put16(&mut out, 20);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0);
            put16(&mut out, DOS_DATE);
            put32(&mut out, entry.crc32);
            put32(&mut out, entry.payload.len() as u32);
            put32(&mut out, entry.uncompressed_size);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, entry.central_extra.len() as u16);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put32(&mut out, 0);
            put32(&mut out, *offset);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.central_extra);
        }
        let cd_size = out.len() - cd_offset;
        let count = self.entries.len();

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count as u64);
            put64(&mut out, count as u64);
            put64(&mut out, cd_size as u64);
            put64(&mut out, cd_offset as u64);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, eocd64_offset);
            put32(&mut out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        if self.zip64 {
            put16(&mut out, 0xFFFF);
            put16(&mut out, 0xFFFF);
            put32(&mut out, 0xFFFF_FFFF);
            put32(&mut out, 0xFFFF_FFFF);
        } else {
            put16(&mut out, count as u16);
            put16(&mut out, count as u16);
            put32(&mut out, cd_size as u32);
            put32(&mut out, cd_offset as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
