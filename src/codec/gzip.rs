//! The gzip member container (RFC 1952) around a raw DEFLATE stream.
//!
//! The engine only ever sees the raw DEFLATE body;
//! the header and trailer are handled here rather than by `flate2`'s gzip types.
//! That keeps one engine session behind every `Encoding`, and lets `Guess`
//! pick the engine after peeking at the header, before any input is consumed.

use std::io::prelude::*;

use crc32fast::Hasher;
use log::*;

use super::Level;
use crate::result::*;
use crate::stream;

const MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FLAG_TEXT: u8 = 1 << 0;
const FLAG_HEADER_CRC: u8 = 1 << 1;
const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;
const FLAG_RESERVED: u8 = 0b1110_0000;

/// "Unknown" in the header's OS field
const OS_UNKNOWN: u8 = 255;

/// Returns true if `first_byte` can only start a gzip member.
///
/// The low nibble of a zlib stream's first byte is its compression method,
/// which must be 8, so `0x1f` is never ambiguous.
pub fn is_gzip(first_byte: u8) -> bool {
    first_byte == MAGIC[0]
}

/// The optional parts of a gzip member header
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    pub modification_time: u32,
    pub operating_system: u8,
    pub text: bool,
    pub extra: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
}

fn corrupt() -> StreamError {
    StreamError::EngineFault {
        engine: Engine::Deflate,
        code: FaultCode::DataCorrupt,
    }
}

/// Reads a NUL-terminated field, appending it (terminator included)
/// to the raw header bytes.
fn read_terminated<R: BufRead>(reader: &mut R, raw: &mut Vec<u8>) -> StreamResult<Vec<u8>> {
    let start = raw.len();
    reader.read_until(0, raw)?;
    if raw.last() != Some(&0) || raw.len() == start {
        return Err(StreamError::ShortRead {
            expected: raw.len() - start + 1,
            actual: raw.len() - start,
        });
    }
    Ok(raw[start..raw.len() - 1].to_vec())
}

/// Reads a gzip member header, leaving `reader` at the start of the DEFLATE body.
pub fn read_header<R: BufRead>(reader: &mut R) -> StreamResult<GzipHeader> {
    // +---+---+---+---+---+---+---+---+---+---+
    // |ID1|ID2|CM |FLG|     MTIME     |XFL|OS |
    // +---+---+---+---+---+---+---+---+---+---+
    let mut fixed = [0u8; 10];
    stream::read_exact(reader, &mut fixed)?;
    if fixed[..2] != MAGIC || fixed[2] != METHOD_DEFLATE {
        return Err(corrupt());
    }
    let flags = fixed[3];
    if flags & FLAG_RESERVED != 0 {
        return Err(corrupt());
    }

    let mut raw = fixed.to_vec();
    let mut header = GzipHeader {
        modification_time: u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
        operating_system: fixed[9],
        text: flags & FLAG_TEXT != 0,
        ..GzipHeader::default()
    };

    if flags & FLAG_EXTRA != 0 {
        let mut length = [0u8; 2];
        stream::read_exact(reader, &mut length)?;
        let mut extra = vec![0u8; u16::from_le_bytes(length) as usize];
        stream::read_exact(reader, &mut extra)?;
        raw.extend_from_slice(&length);
        raw.extend_from_slice(&extra);
        header.extra = Some(extra);
    }
    if flags & FLAG_NAME != 0 {
        header.name = Some(read_terminated(reader, &mut raw)?);
    }
    if flags & FLAG_COMMENT != 0 {
        header.comment = Some(read_terminated(reader, &mut raw)?);
    }
    if flags & FLAG_HEADER_CRC != 0 {
        let mut stored = [0u8; 2];
        stream::read_exact(reader, &mut stored)?;
        let mut hasher = Hasher::new();
        hasher.update(&raw);
        let actual = hasher.finalize() & 0xffff;
        let expected = u16::from_le_bytes(stored) as u32;
        if actual != expected {
            return Err(StreamError::ChecksumMismatch { expected, actual });
        }
    }

    trace!("{:?}", header);
    Ok(header)
}

/// Writes a minimal gzip member header: no name, no timestamp.
pub fn write_header<W: Write + ?Sized>(writer: &mut W, level: Level) -> StreamResult<()> {
    let extra_flags = match level {
        Level::Best => 2,
        Level::Fast => 4,
        _ => 0,
    };
    let header = [
        MAGIC[0],
        MAGIC[1],
        METHOD_DEFLATE,
        0,
        0,
        0,
        0,
        0,
        extra_flags,
        OS_UNKNOWN,
    ];
    stream::write_exact(writer, &header)
}

/// Reads the member trailer and checks it against what we decompressed.
pub fn check_trailer<R: Read + ?Sized>(
    reader: &mut R,
    crc: u32,
    decompressed_size: u64,
) -> StreamResult<()> {
    // +---+---+---+---+---+---+---+---+
    // |     CRC32     |     ISIZE     |
    // +---+---+---+---+---+---+---+---+
    let mut trailer = [0u8; 8];
    stream::read_exact(reader, &mut trailer)?;
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if expected != crc {
        return Err(StreamError::ChecksumMismatch {
            expected,
            actual: crc,
        });
    }
    // ISIZE is the size modulo 2^32.
    let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    if size != decompressed_size as u32 {
        return Err(corrupt());
    }
    Ok(())
}

pub fn write_trailer<W: Write + ?Sized>(
    writer: &mut W,
    crc: u32,
    uncompressed_size: u64,
) -> StreamResult<()> {
    let mut trailer = [0u8; 8];
    trailer[..4].copy_from_slice(&crc.to_le_bytes());
    trailer[4..].copy_from_slice(&(uncompressed_size as u32).to_le_bytes());
    stream::write_exact(writer, &trailer)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_header_with_every_optional_field() {
        let mut member = vec![0x1f, 0x8b, 8, FLAG_EXTRA | FLAG_NAME | FLAG_COMMENT | FLAG_HEADER_CRC];
        member.extend_from_slice(&0x5f5e0ff0u32.to_le_bytes());
        member.extend_from_slice(&[0, 3]);
        member.extend_from_slice(&[2, 0, b'x', b'y']);
        member.extend_from_slice(b"notes.txt\0");
        member.extend_from_slice(b"hello\0");
        let mut hasher = Hasher::new();
        hasher.update(&member);
        member.extend_from_slice(&(hasher.finalize() as u16).to_le_bytes());
        member.extend_from_slice(b"body");

        let mut reader = &member[..];
        let header = read_header(&mut reader).unwrap();
        assert_eq!(header.modification_time, 0x5f5e0ff0);
        assert_eq!(header.operating_system, 3);
        assert_eq!(header.extra.as_deref(), Some(&b"xy"[..]));
        assert_eq!(header.name.as_deref(), Some(&b"notes.txt"[..]));
        assert_eq!(header.comment.as_deref(), Some(&b"hello"[..]));
        assert_eq!(reader, b"body");
    }

    #[test]
    fn test_bad_header_crc() {
        let member = [0x1f, 0x8b, 8, FLAG_HEADER_CRC, 0, 0, 0, 0, 0, 255, 0xde, 0xad];
        assert_matches!(
            read_header(&mut &member[..]),
            Err(StreamError::ChecksumMismatch { expected: 0xadde, .. })
        );
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        let zlib = [0x78, 0x9c, 8, 0, 0, 0, 0, 0, 0, 255];
        assert_matches!(
            read_header(&mut &zlib[..]),
            Err(StreamError::EngineFault {
                code: FaultCode::DataCorrupt,
                ..
            })
        );
        let unterminated = [0x1f, 0x8b, 8, FLAG_NAME, 0, 0, 0, 0, 0, 255, b'a'];
        assert_matches!(
            read_header(&mut &unterminated[..]),
            Err(StreamError::ShortRead { .. })
        );
        assert_matches!(
            read_header(&mut &zlib[..4]),
            Err(StreamError::ShortRead {
                expected: 10,
                actual: 4
            })
        );
    }

    #[test]
    fn test_written_header_reads_back() {
        let mut member = Vec::new();
        write_header(&mut member, Level::Best).unwrap();
        assert_eq!(member.len(), 10);
        assert!(is_gzip(member[0]));
        let header = read_header(&mut &member[..]).unwrap();
        assert_eq!(header.operating_system, OS_UNKNOWN);
        assert_eq!(header.name, None);
    }

    #[test]
    fn test_trailer_checks() {
        let mut trailer = Vec::new();
        write_trailer(&mut trailer, 0xcafef00d, (1 << 32) + 5).unwrap();
        check_trailer(&mut &trailer[..], 0xcafef00d, (1 << 32) + 5).unwrap();
        assert_matches!(
            check_trailer(&mut &trailer[..], 0xcafef00e, 5),
            Err(StreamError::ChecksumMismatch { .. })
        );
        assert_matches!(
            check_trailer(&mut &trailer[..], 0xcafef00d, 6),
            Err(StreamError::EngineFault { .. })
        );
    }
}
