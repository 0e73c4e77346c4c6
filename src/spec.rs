//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//! Every parser here checks lengths before it reads:
//! a truncated or lying record is a [`MalformedArchive`] error, never a panic.
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [`MalformedArchive`]: ../result/enum.StreamError.html#variant.MalformedArchive

use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};
use log::*;
use memchr::memmem;

use crate::cp437;
use crate::read::{CompressionMethod, ZipEntry};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Size of the End of central directory record, minus its comment
pub const EOCDR_SIZE: usize = 22;
/// Size of a central directory entry, minus its variable-length fields
pub const CENTRAL_DIRECTORY_ENTRY_SIZE: usize = 46;
/// Size of a local file header, minus its variable-length fields
pub const LOCAL_FILE_HEADER_SIZE: usize = 30;
/// The EOCDR can't be further than this from the end of the archive.
pub const MAX_EOCDR_SEARCH: usize = EOCDR_SIZE + u16::MAX as usize;

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            12 => CompressionMethod::Bzip2,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.
        //
        // 4.4.2.2 The current mappings are:
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  ...
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// Splits `n` bytes off the front of `input`.
fn take<'a>(input: &mut &'a [u8], n: usize, context: &'static str) -> StreamResult<&'a [u8]> {
    if input.len() < n {
        return Err(StreamError::MalformedArchive(context));
    }
    let (taken, rest) = input.split_at(n);
    *input = rest;
    Ok(taken)
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> StreamResult<u32> {
    let b = take(input, 4, "Truncated record")?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> StreamResult<u16> {
    let b = take(input, 2, "Truncated record")?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> StreamResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let magic = take(
            &mut eocdr,
            4,
            "Truncated End Of Central Directory Record",
        )?;
        if magic != EOCDR_MAGIC {
            return Err(StreamError::MalformedArchive(
                "Invalid End Of Central Directory Record signature",
            ));
        }
        if eocdr.len() < EOCDR_SIZE - 4 {
            return Err(StreamError::MalformedArchive(
                "Truncated End Of Central Directory Record",
            ));
        }
        let disk_number = read_u16(&mut eocdr)?;
        let disk_with_central_directory = read_u16(&mut eocdr)?;
        let entries_on_this_disk = read_u16(&mut eocdr)?;
        let entries = read_u16(&mut eocdr)?;
        let central_directory_size = read_u32(&mut eocdr)?;
        let central_directory_offset = read_u32(&mut eocdr)?;
        let comment_length = read_u16(&mut eocdr)? as usize;
        let file_comment = take(
            &mut eocdr,
            comment_length,
            "Archive comment runs past the end of the archive",
        )?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// True if any field holds the "look in the Zip64 record" sentinel
    pub fn is_zip64(&self) -> bool {
        self.entries == u16::MAX
            || self.entries_on_this_disk == u16::MAX
            || self.central_directory_size == u32::MAX
            || self.central_directory_offset == u32::MAX
    }
}

/// Searches backward through `window` (the tail of the archive)
/// to find the End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable-length comment means we can't jump to a known offset.
/// The comment can also contain the magic number, so a match only counts
/// if the whole record fits in the window and its comment length doesn't
/// run past the end. A record whose comment ends exactly at the end of the
/// window wins over any other candidate.
pub fn find_eocdr(window: &[u8]) -> StreamResult<usize> {
    if window.len() < EOCDR_SIZE {
        return Err(StreamError::MalformedArchive(
            "Too small to be a ZIP archive",
        ));
    }

    // Only look for magic numbers that start early enough to fit a record.
    let mut search_end = window.len() - EOCDR_SIZE + EOCDR_MAGIC.len();
    let mut fallback = None;
    while let Some(candidate) = memmem::rfind(&window[..search_end], &EOCDR_MAGIC) {
        let comment_length =
            u16::from_le_bytes([window[candidate + 20], window[candidate + 21]]) as usize;
        let record_end = candidate + EOCDR_SIZE + comment_length;
        if record_end == window.len() {
            return Ok(candidate);
        }
        if record_end < window.len() && fallback.is_none() {
            fallback = Some((candidate, record_end));
        } else {
            trace!("Skipping End Of Central Directory magic at {}", candidate);
        }
        // Keep searching, excluding this candidate (but not the byte before it).
        search_end = candidate + EOCDR_MAGIC.len() - 1;
    }

    match fallback {
        Some((candidate, record_end)) => {
            warn!(
                "{} bytes of trailing data after the End Of Central Directory Record",
                window.len() - record_end
            );
            Ok(candidate)
        }
        None => Err(StreamError::MalformedArchive(
            "Couldn't find End Of Central Directory Record",
        )),
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> StreamResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut fixed = take(
            entry,
            CENTRAL_DIRECTORY_ENTRY_SIZE,
            "Truncated central directory entry",
        )?;
        if take(&mut fixed, 4, "Truncated central directory entry")? != CENTRAL_DIRECTORY_MAGIC {
            return Err(StreamError::MalformedArchive(
                "Invalid central directory entry signature",
            ));
        }
        let source_version = read_u16(&mut fixed)?;
        let minimum_extract_version = read_u16(&mut fixed)?;
        let flags = read_u16(&mut fixed)?;
        let compression_method = read_u16(&mut fixed)?;
        let last_modified_time = read_u16(&mut fixed)?;
        let last_modified_date = read_u16(&mut fixed)?;
        let crc32 = read_u32(&mut fixed)?;
        let compressed_size = read_u32(&mut fixed)?;
        let uncompressed_size = read_u32(&mut fixed)?;
        let path_length = read_u16(&mut fixed)? as usize;
        let extra_field_length = read_u16(&mut fixed)? as usize;
        let file_comment_length = read_u16(&mut fixed)? as usize;
        let disk_number = read_u16(&mut fixed)?;
        let internal_file_attributes = read_u16(&mut fixed)?;
        let external_file_attributes = read_u32(&mut fixed)?;
        let header_offset = read_u32(&mut fixed)?;

        const OVERRUN: &str = "Central directory entry runs past the end of the central directory";
        let path = take(entry, path_length, OVERRUN)?;
        let extra_field = take(entry, extra_field_length, OVERRUN)?;
        let file_comment = take(entry, file_comment_length, OVERRUN)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "sizes and CRC follow the data" bit from the 16-bit flags field.
pub fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: If this bit is set, the fields crc-32, compressed
    //        size and uncompressed size are set to zero in the
    //        local header.  The correct values are put in the
    //        data descriptor immediately following the compressed
    //        data.
    flags & (1 << 3) != 0
}

impl ZipEntry {
    /// Extracts a `ZipEntry` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> StreamResult<Self> {
        let is_utf8 = is_utf8(cde.flags);
        let path = Utf8PathBuf::from(cp437::decode_text(cde.path, is_utf8)?.into_owned());
        let comment = cp437::decode_text(cde.file_comment, is_utf8)?.into_owned();

        if cde.disk_number != 0 {
            return Err(StreamError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                path, cde.disk_number,
            )));
        }
        if cde.compressed_size == u32::MAX
            || cde.uncompressed_size == u32::MAX
            || cde.header_offset == u32::MAX
        {
            return Err(StreamError::UnsupportedArchive(format!(
                "No support for Zip64 archives: file {} has Zip64 sizes or offsets",
                path,
            )));
        }

        Ok(Self {
            path,
            comment,
            size: cde.uncompressed_size as u64,
            compressed_size: cde.compressed_size as u64,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            flags: cde.flags,
            encrypted: is_encrypted(cde.flags),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            version_made_by: cde.source_version,
            version_needed: cde.minimum_extract_version,
            external_attributes: cde.external_file_attributes,
            extra_field: cde.extra_field.to_vec(),
            header_offset: cde.header_offset as u64,
        })
    }
}

/// Decodes an MS-DOS date and time, or returns `None`
/// if they don't make a valid timestamp (like the all-zero "no date").
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// We only use it to find where the contents start,
/// and to double-check the central directory.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    /// Parses the fixed-size part of the header.
    /// The name and extra field follow it.
    pub fn parse(mut header: &[u8]) -> StreamResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        if header.len() < LOCAL_FILE_HEADER_SIZE {
            return Err(StreamError::MalformedArchive("Truncated local file header"));
        }
        if take(&mut header, 4, "Truncated local file header")? != LOCAL_FILE_HEADER_MAGIC {
            return Err(StreamError::MalformedArchive(
                "Invalid local file header signature",
            ));
        }
        Ok(Self {
            minimum_extract_version: read_u16(&mut header)?,
            flags: read_u16(&mut header)?,
            compression_method: read_u16(&mut header)?,
            last_modified_time: read_u16(&mut header)?,
            last_modified_date: read_u16(&mut header)?,
            crc32: read_u32(&mut header)?,
            compressed_size: read_u32(&mut header)?,
            uncompressed_size: read_u32(&mut header)?,
            path_length: read_u16(&mut header)?,
            extra_field_length: read_u16(&mut header)?,
        })
    }

    /// Size of the whole header, variable-length fields included
    pub fn size_in_file(&self) -> u64 {
        (LOCAL_FILE_HEADER_SIZE + self.path_length as usize + self.extra_field_length as usize)
            as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn eocdr(entries: u16, comment: &[u8]) -> Vec<u8> {
        let mut record = EOCDR_MAGIC.to_vec();
        record.extend_from_slice(&[0, 0, 0, 0]);
        record.extend_from_slice(&entries.to_le_bytes());
        record.extend_from_slice(&entries.to_le_bytes());
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        record.extend_from_slice(comment);
        record
    }

    #[test]
    fn test_eocdr_at_index_zero() {
        let record = eocdr(0, b"");
        assert_eq!(find_eocdr(&record).unwrap(), 0);
        let parsed = EndOfCentralDirectory::parse(&record).unwrap();
        assert_eq!(parsed.entries, 0);
        assert!(parsed.file_comment.is_empty());
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn test_magic_in_comment() {
        // A comment holding its own (bogus) record, which would claim a
        // comment running far past the end of the archive
        let mut comment = eocdr(7, b"");
        comment[20] = 0xff;
        comment[21] = 0xff;
        comment.extend_from_slice(b" and some more text");
        let mut archive = b"junk up front".to_vec();
        archive.extend_from_slice(&eocdr(3, &comment));

        let found = find_eocdr(&archive).unwrap();
        assert_eq!(found, 13);
        assert_eq!(EndOfCentralDirectory::parse(&archive[found..]).unwrap().entries, 3);
    }

    #[test]
    fn test_magic_too_close_to_the_end() {
        // Magic in the last 22 bytes can't start a record.
        let mut archive = eocdr(1, b"PK\x05\x06");
        assert_eq!(find_eocdr(&archive).unwrap(), 0);

        archive.truncate(EOCDR_SIZE - 1);
        assert_matches!(
            find_eocdr(&archive),
            Err(StreamError::MalformedArchive("Too small to be a ZIP archive"))
        );
        assert_matches!(
            find_eocdr(&[0u8; 100]),
            Err(StreamError::MalformedArchive(
                "Couldn't find End Of Central Directory Record"
            ))
        );
    }

    #[test]
    fn test_trailing_data_after_eocdr() {
        let mut archive = eocdr(2, b"hi");
        archive.extend_from_slice(&[0; 5]);
        assert_eq!(find_eocdr(&archive).unwrap(), 0);
    }

    #[test]
    fn test_truncated_central_directory_entry() {
        let mut short: &[u8] = &[b'P', b'K', 1, 2, 0, 0];
        assert_matches!(
            CentralDirectoryEntry::parse_and_consume(&mut short),
            Err(StreamError::MalformedArchive("Truncated central directory entry"))
        );

        let mut entry = CENTRAL_DIRECTORY_MAGIC.to_vec();
        entry.resize(CENTRAL_DIRECTORY_ENTRY_SIZE, 0);
        // File name length
        entry[28] = 10;
        entry.extend_from_slice(b"short");
        assert_matches!(
            CentralDirectoryEntry::parse_and_consume(&mut &entry[..]),
            Err(StreamError::MalformedArchive(
                "Central directory entry runs past the end of the central directory"
            ))
        );

        let mut bad_magic = vec![0u8; CENTRAL_DIRECTORY_ENTRY_SIZE];
        bad_magic[..4].copy_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        assert_matches!(
            CentralDirectoryEntry::parse_and_consume(&mut &bad_magic[..]),
            Err(StreamError::MalformedArchive(
                "Invalid central directory entry signature"
            ))
        );
    }

    #[test]
    fn test_local_header() {
        let mut header = LOCAL_FILE_HEADER_MAGIC.to_vec();
        header.resize(LOCAL_FILE_HEADER_SIZE, 0);
        header[8] = 8; // Deflate
        header[26] = 3;
        header[28] = 4;
        let parsed = LocalFileHeader::parse(&header).unwrap();
        assert_eq!(parsed.compression_method, 8);
        assert_eq!(parsed.size_in_file(), 37);

        assert_matches!(
            LocalFileHeader::parse(&header[..20]),
            Err(StreamError::MalformedArchive("Truncated local file header"))
        );
        header[3] = 2;
        assert_matches!(
            LocalFileHeader::parse(&header),
            Err(StreamError::MalformedArchive(
                "Invalid local file header signature"
            ))
        );
    }

    #[test]
    fn test_msdos_timestamps() {
        // 2020-05-17 13:42:58
        let time = (13 << 11) | (42 << 5) | 29;
        let date = (40 << 9) | (5 << 5) | 17;
        let parsed = parse_msdos(time, date).unwrap();
        assert_eq!(parsed.to_string(), "2020-05-17 13:42:58");

        // Month 0 doesn't exist.
        assert_eq!(parse_msdos(0, 0), None);
    }

    #[test]
    fn test_flags_and_methods() {
        assert!(is_utf8(0x0800));
        assert!(!is_utf8(0x0008));
        assert!(has_data_descriptor(0x0008));
        assert!(is_encrypted(0x0001));
        assert_eq!(CompressionMethod::from_u16(12), CompressionMethod::Bzip2);
        assert_eq!(CompressionMethod::from_u16(14), CompressionMethod::Unsupported(14));
        assert_eq!(System::from_source_version(0x031e), System::Unix);
        assert_eq!(System::from_source_version(0x0014), System::Dos);
    }
}
