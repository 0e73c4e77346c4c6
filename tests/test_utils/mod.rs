//! Shared helpers for integration tests: an in-memory ZIP writer
//! (just enough of one to build test archives) and proptest strategies.

#![allow(dead_code)]

use std::io::prelude::*;

use crc32fast::Hasher;
use proptest::prelude::*;

use layerio::codec::{Bzip2Writer, DeflateWriter, Encoding, Level};

pub const STORED: u16 = 0;
pub const DEFLATE: u16 = 8;
pub const BZIP2: u16 = 12;

pub const FLAG_ENCRYPTED: u16 = 1;
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const FLAG_UTF8: u16 = 1 << 11;

/// 2021-03-04 05:06:08
pub const DOS_TIME: u16 = (5 << 11) | (6 << 5) | 4;
pub const DOS_DATE: u16 = (41 << 9) | (3 << 5) | 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compresses `data` the way a ZIP entry with the given method stores it.
pub fn compress(data: &[u8], method: u16) -> Vec<u8> {
    match method {
        DEFLATE => {
            let mut writer = DeflateWriter::builder(Vec::new())
                .with_encoding(Encoding::None)
                .with_level(Level::Best)
                .build()
                .unwrap();
            writer.write_all(data).unwrap();
            writer.finish().unwrap();
            writer.into_inner()
        }
        BZIP2 => {
            let mut writer = Bzip2Writer::builder(Vec::new()).build().unwrap();
            writer.write_all(data).unwrap();
            writer.finish().unwrap();
            writer.into_inner()
        }
        // Anything else we just store, whatever the header claims.
        _ => data.to_vec(),
    }
}

/// One entry of a [`ZipBuilder`] archive. Fields are public so tests can
/// build archives that lie.
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub method: u16,
    pub flags: u16,
    pub comment: Vec<u8>,
    pub crc32: u32,
    /// Written to the local header instead of `name` when set
    pub local_name: Option<Vec<u8>>,
    /// Written to the local header instead of `method` when set
    pub local_method: Option<u16>,
    /// Claimed by both headers instead of the real compressed size when set
    pub compressed_size: Option<u32>,
    /// Extra field of the local header only
    pub local_extra: Vec<u8>,
    /// Extra field of the central directory entry only
    pub extra: Vec<u8>,
}

impl TestEntry {
    pub fn new(name: &str, data: &[u8], method: u16) -> Self {
        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        Self {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
            method,
            flags,
            comment: Vec::new(),
            crc32: crc32(data),
            local_name: None,
            local_method: None,
            compressed_size: None,
            local_extra: Vec::new(),
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ZipBuilder {
    pub prefix: Vec<u8>,
    pub entries: Vec<TestEntry>,
    pub comment: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, data: &[u8], method: u16) -> Self {
        self.entries.push(TestEntry::new(name, data, method));
        self
    }

    pub fn dir(self, name: &str) -> Self {
        self.file(name, b"", STORED)
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut archive = self.prefix.clone();
        let mut central_directory = Vec::new();

        for entry in &self.entries {
            let compressed = compress(&entry.data, entry.method);
            let header_offset = archive.len() as u32;
            let local_name = entry.local_name.as_ref().unwrap_or(&entry.name);
            let compressed_size = entry.compressed_size.unwrap_or(compressed.len() as u32);

            // Local file header
            archive.extend_from_slice(b"PK\x03\x04");
            put_u16(&mut archive, 20);
            put_u16(&mut archive, entry.flags);
            put_u16(&mut archive, entry.local_method.unwrap_or(entry.method));
            put_u16(&mut archive, DOS_TIME);
            put_u16(&mut archive, DOS_DATE);
            if entry.flags & FLAG_DATA_DESCRIPTOR != 0 {
                put_u32(&mut archive, 0);
                put_u32(&mut archive, 0);
                put_u32(&mut archive, 0);
            } else {
                put_u32(&mut archive, entry.crc32);
                put_u32(&mut archive, compressed_size);
                put_u32(&mut archive, entry.data.len() as u32);
            }
            put_u16(&mut archive, local_name.len() as u16);
            put_u16(&mut archive, entry.local_extra.len() as u16);
            archive.extend_from_slice(local_name);
            archive.extend_from_slice(&entry.local_extra);
            archive.extend_from_slice(&compressed);
            if entry.flags & FLAG_DATA_DESCRIPTOR != 0 {
                archive.extend_from_slice(b"PK\x07\x08");
                put_u32(&mut archive, entry.crc32);
                put_u32(&mut archive, compressed_size);
                put_u32(&mut archive, entry.data.len() as u32);
            }

            // Central directory entry
            let cd = &mut central_directory;
            cd.extend_from_slice(b"PK\x01\x02");
            put_u16(cd, 0x031e); // Unix, spec version 3.0
            put_u16(cd, 20);
            put_u16(cd, entry.flags);
            put_u16(cd, entry.method);
            put_u16(cd, DOS_TIME);
            put_u16(cd, DOS_DATE);
            put_u32(cd, entry.crc32);
            put_u32(cd, compressed_size);
            put_u32(cd, entry.data.len() as u32);
            put_u16(cd, entry.name.len() as u16);
            put_u16(cd, entry.extra.len() as u16);
            put_u16(cd, entry.comment.len() as u16);
            put_u16(cd, 0);
            put_u16(cd, 0);
            let mode: u32 = if entry.name.ends_with(b"/") { 0o40755 } else { 0o100644 };
            put_u32(cd, mode << 16);
            put_u32(cd, header_offset);
            cd.extend_from_slice(&entry.name);
            cd.extend_from_slice(&entry.extra);
            cd.extend_from_slice(&entry.comment);
        }

        let central_directory_offset = archive.len() as u32;
        archive.extend_from_slice(&central_directory);

        archive.extend_from_slice(b"PK\x05\x06");
        put_u16(&mut archive, 0);
        put_u16(&mut archive, 0);
        put_u16(&mut archive, self.entries.len() as u16);
        put_u16(&mut archive, self.entries.len() as u16);
        put_u32(&mut archive, central_directory.len() as u32);
        put_u32(&mut archive, central_directory_offset);
        put_u16(&mut archive, self.comment.len() as u16);
        archive.extend_from_slice(&self.comment);
        archive
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Deterministic, mildly compressible bytes
pub fn sample_data(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if i % 3 == 0 {
                b'a' + (i % 26) as u8
            } else {
                (state >> 24) as u8
            }
        })
        .collect()
}

pub fn levels() -> impl Strategy<Value = Level> {
    prop_oneof![
        Just(Level::None),
        Just(Level::Fast),
        Just(Level::Normal),
        Just(Level::Best),
    ]
}

pub fn writer_encodings() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Zlib), Just(Encoding::Gzip), Just(Encoding::None)]
}

/// Either noise or long runs, since codecs take different paths for each
pub fn payloads() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..2048),
        prop::collection::vec((any::<u8>(), 1usize..300), 0..32).prop_map(|runs| {
            runs.into_iter()
                .flat_map(|(byte, count)| std::iter::repeat(byte).take(count))
                .collect()
        }),
    ]
}
