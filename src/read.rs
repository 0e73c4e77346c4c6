//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, create a [`ZipArchive`] from any
//! seekable stream: a `File`, a `Cursor` over bytes or a memory map,
//! a [`MemoryStream`](../memory/struct.MemoryStream.html)...
//!
//! [`ZipArchive`]: struct.ZipArchive.html

use std::io::{self, prelude::*, SeekFrom};

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use log::*;

use crate::arch::usize;
use crate::codec::{Bzip2Reader, Encoding, InflateReader, DEFAULT_BUFFER_SIZE};
use crate::cp437;
use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::slice::SliceStream;
use crate::spec;
use crate::stream::{self, DirectReader, DirectSource};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with [bzip2](https://en.wikipedia.org/wiki/Bzip2).
    Bzip2,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    /// The method's code in ZIP headers
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Unsupported(code) => code,
        }
    }
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// The provided path of the file.
    pub path: Utf8PathBuf,

    /// The entry's comment (usually empty)
    pub comment: String,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// The general purpose bit flags
    pub flags: u16,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// When the file was last modified, if the archive recorded a valid date
    pub last_modified: Option<NaiveDateTime>,

    pub version_made_by: u16,

    pub version_needed: u16,

    pub external_attributes: u32,

    /// Raw extra fields, which we don't interpret.
    pub extra_field: Vec<u8>,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: u64,
}

impl ZipEntry {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        // Path::ends_with() doesn't consider separators,
        // so we need a different approach.
        self.size == 0 && self.path.as_str().ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Unix mode bits, if the file was archived in a Unix OS.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits, or do other cross-OS handwaving.
    pub fn unix_mode(&self) -> Option<u16> {
        match spec::System::from_source_version(self.version_made_by) {
            spec::System::Unix => Some((self.external_attributes >> 16) as u16),
            _ => None,
        }
    }

    /// Where the entry's local file header starts in the archive
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }
}

/// A ZIP archive to be read
///
/// The central directory is parsed up front, so a `ZipArchive` that exists
/// has a complete list of entries. Reading an entry borrows the archive
/// mutably, since every entry shares the stream's cursor.
/// To read entries concurrently, give each one its own stream with [`open_entry`].
///
/// ```
/// # use std::io::{Cursor, Read};
/// # use layerio::read::ZipArchive;
/// # fn demo(bytes: Vec<u8>) -> anyhow::Result<()> {
/// let mut archive = ZipArchive::new(Cursor::new(bytes))?;
/// for i in 0..archive.len() {
///     let mut contents = Vec::new();
///     archive.read_index(i)?.read_to_end(&mut contents)?;
/// }
/// # Ok(())
/// # }
/// ```
///
/// [`open_entry`]: fn.open_entry.html
#[derive(Debug)]
pub struct ZipArchive<S> {
    stream: S,
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
}

impl<S: Read + Seek> ZipArchive<S> {
    /// Reads the archive's central directory.
    pub fn new(mut stream: S) -> StreamResult<Self> {
        let length = stream::stream_length(&mut stream)?;
        if length < spec::EOCDR_SIZE as u64 {
            return Err(StreamError::MalformedArchive(
                "Too small to be a ZIP archive",
            ));
        }

        // The EOCDR is somewhere in the last 64 kB or so.
        let window_length = length.min(spec::MAX_EOCDR_SEARCH as u64);
        let window_start = length - window_length;
        let mut window = vec![0; usize(window_length)?];
        stream.seek(SeekFrom::Start(window_start))?;
        stream::read_exact(&mut stream, &mut window)?;

        let eocdr_posit = spec::find_eocdr(&window)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&window[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(StreamError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(StreamError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }
        if eocdr.is_zip64() {
            return Err(StreamError::UnsupportedArchive(String::from(
                "No support for Zip64 archives",
            )));
        }

        let eocdr_offset = window_start + eocdr_posit as u64;
        let central_directory_offset = eocdr.central_directory_offset as u64;
        let central_directory_size = eocdr.central_directory_size as u64;
        if central_directory_offset + central_directory_size > eocdr_offset {
            return Err(StreamError::MalformedArchive(
                "Central directory runs into the End Of Central Directory Record",
            ));
        }
        trace!(
            "{} entries at offset {}",
            eocdr.entries,
            central_directory_offset
        );

        let mut central_directory = vec![0; usize(central_directory_size)?];
        stream.seek(SeekFrom::Start(central_directory_offset))?;
        stream::read_exact(&mut stream, &mut central_directory)?;

        let mut remaining = &central_directory[..];
        let mut entries = Vec::with_capacity(eocdr.entries as usize);
        for _ in 0..eocdr.entries {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut remaining)?;
            trace!("{:?}", dir_entry);

            let entry = ZipEntry::from_cde(&dir_entry)?;
            debug!("{:?}", entry);
            entries.push(entry);
        }

        Ok(Self {
            stream,
            entries,
            comment: eocdr.file_comment.to_vec(),
        })
    }

    /// Opens the given entry for reading.
    ///
    /// `entry` should come from this archive's [`entries()`](#method.entries).
    pub fn read(&mut self, entry: &ZipEntry) -> StreamResult<BufferedEntryReader<&mut S>> {
        open_entry(&mut self.stream, entry)
    }

    /// Opens the `index`th entry for reading.
    ///
    /// ## Panics
    ///
    /// If `index` is out of bounds
    pub fn read_index(&mut self, index: usize) -> StreamResult<BufferedEntryReader<&mut S>> {
        open_entry(&mut self.stream, &self.entries[index])
    }
}

impl<S: Read + Seek + DirectSource> ZipArchive<S> {
    /// Like [`read()`](#method.read), but decodes straight out of the
    /// archive's memory instead of copying it through a buffer.
    pub fn read_direct(
        &mut self,
        entry: &ZipEntry,
    ) -> StreamResult<DirectEntryReader<&mut S>> {
        open_entry_direct(&mut self.stream, entry)
    }
}

impl<S> ZipArchive<S> {
    /// Returns the entries found in the ZIP archive's central directory.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the first entry with the given path.
    pub fn entry<P: AsRef<str>>(&self, path: P) -> Option<&ZipEntry> {
        let path = path.as_ref();
        self.entries.iter().find(|e| e.path.as_str() == path)
    }

    /// The archive's comment, as raw bytes
    /// (the ZIP format doesn't say what encoding it's in).
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// An entry read through a `BufReader` copy of its compressed bytes,
/// as returned by [`open_entry`](fn.open_entry.html)
pub type BufferedEntryReader<S> = ZipEntryReader<io::BufReader<SliceStream<S>>>;

/// An entry decoded straight out of a memory-resident archive,
/// as returned by [`open_entry_direct`](fn.open_entry_direct.html)
pub type DirectEntryReader<S> = ZipEntryReader<DirectReader<SliceStream<S>>>;

/// Opens an entry on the given stream, which must hold the archive
/// `entry` came from.
///
/// Since each file in a ZIP archive is compressed independently,
/// entries opened on separate streams (separate `File` handles,
/// separate `Cursor`s over one memory map...) can be read in parallel.
///
/// Compressed bytes are copied through a buffer on their way to the decoder.
/// If the archive is already in memory, [`open_entry_direct`] skips that copy.
///
/// [`open_entry_direct`]: fn.open_entry_direct.html
pub fn open_entry<S: Read + Seek>(
    stream: S,
    entry: &ZipEntry,
) -> StreamResult<BufferedEntryReader<S>> {
    let slice = entry_data(stream, entry)?;
    ZipEntryReader::new(
        io::BufReader::with_capacity(DEFAULT_BUFFER_SIZE, slice),
        entry,
    )
}

/// Opens an entry on a memory-resident stream (a `Cursor` over a memory map,
/// a [`MemoryStream`](../memory/struct.MemoryStream.html)...).
///
/// The decoder reads the entry's compressed bytes where they sit.
pub fn open_entry_direct<S: Read + Seek + DirectSource>(
    stream: S,
    entry: &ZipEntry,
) -> StreamResult<DirectEntryReader<S>> {
    let slice = entry_data(stream, entry)?;
    ZipEntryReader::new(DirectReader::new(slice), entry)
}

/// Checks that `entry` can be read, then finds its compressed bytes
/// from its local file header.
fn entry_data<S: Read + Seek>(
    mut stream: S,
    entry: &ZipEntry,
) -> StreamResult<SliceStream<S>> {
    if entry.encrypted {
        return Err(StreamError::UnsupportedArchive(format!(
            "Can't read encrypted file {}",
            entry.path
        )));
    }
    if let CompressionMethod::Unsupported(code) = entry.compression_method {
        return Err(StreamError::UnsupportedMethod(code));
    }

    let archive_length = stream::stream_length(&mut stream)?;
    stream.seek(SeekFrom::Start(entry.header_offset))?;
    let mut fixed = [0u8; spec::LOCAL_FILE_HEADER_SIZE];
    stream::read_exact(&mut stream, &mut fixed).map_err(truncated_local_header)?;
    let local_header = spec::LocalFileHeader::parse(&fixed)?;
    trace!("{:?}", local_header);

    if cfg!(feature = "check-local-metadata") {
        let mut path = vec![0; local_header.path_length as usize];
        stream::read_exact(&mut stream, &mut path).map_err(truncated_local_header)?;
        check_local_metadata(entry, &local_header, &path)?;
    }

    // The local header's name and extra field needn't match the central directory's,
    // so its own lengths say where the data starts.
    let data_start = entry.header_offset + local_header.size_in_file();
    if data_start + entry.compressed_size > archive_length {
        return Err(StreamError::MalformedArchive(
            "Entry data runs past the end of the archive",
        ));
    }
    SliceStream::new(stream, data_start, entry.compressed_size)
}

fn truncated_local_header(e: StreamError) -> StreamError {
    match e {
        StreamError::ShortRead { .. } => {
            StreamError::MalformedArchive("Truncated local file header")
        }
        other => other,
    }
}

/// Makes sure the local file header tells the same story as the central directory.
fn check_local_metadata(
    entry: &ZipEntry,
    local: &spec::LocalFileHeader,
    local_path: &[u8],
) -> StreamResult<()> {
    let mismatch = || {
        StreamError::MalformedArchive("Central directory entry doesn't match local file header")
    };

    if local.compression_method != entry.compression_method.code() {
        return Err(mismatch());
    }
    let path = cp437::decode_text(local_path, spec::is_utf8(local.flags))?;
    if path != entry.path.as_str() {
        return Err(mismatch());
    }
    // Otherwise these are zeroed, and live in a data descriptor after the file.
    if !spec::has_data_descriptor(local.flags)
        && (local.crc32 != entry.crc32
            || local.compressed_size as u64 != entry.compressed_size
            || local.uncompressed_size as u64 != entry.size)
    {
        return Err(mismatch());
    }
    Ok(())
}

/// Decodes one entry's compressed bytes, read from `R`
#[derive(Debug)]
enum Decoder<R> {
    Stored(R),
    Deflate(InflateReader<R>),
    Bzip2(Bzip2Reader<R>),
}

impl<R: BufRead> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Stored(r) => r.read(buf),
            Decoder::Deflate(r) => r.read(buf),
            Decoder::Bzip2(r) => r.read(buf),
        }
    }
}

/// Reads the decompressed contents of one entry,
/// checking them against the entry's CRC-32 at the end.
///
/// `R` is where the compressed bytes come from; see
/// [`BufferedEntryReader`] and [`DirectEntryReader`].
///
/// [`BufferedEntryReader`]: type.BufferedEntryReader.html
/// [`DirectEntryReader`]: type.DirectEntryReader.html
#[derive(Debug)]
pub struct ZipEntryReader<R> {
    inner: Option<Crc32Reader<Decoder<R>>>,
}

impl<R: BufRead> ZipEntryReader<R> {
    fn new(compressed: R, entry: &ZipEntry) -> StreamResult<Self> {
        let decoder = match entry.compression_method {
            CompressionMethod::Stored => Decoder::Stored(compressed),
            CompressionMethod::Deflate => Decoder::Deflate(
                InflateReader::builder_buffered(compressed)
                    .with_encoding(Encoding::None)
                    .build()?,
            ),
            CompressionMethod::Bzip2 => {
                Decoder::Bzip2(Bzip2Reader::builder_buffered(compressed).build()?)
            }
            CompressionMethod::Unsupported(code) => {
                return Err(StreamError::UnsupportedMethod(code))
            }
        };
        debug!("Reading {} ({:?})", entry.path, entry.compression_method);

        Ok(Self {
            inner: Some(Crc32Reader::new(decoder, entry.crc32)),
        })
    }
}

impl<R> ZipEntryReader<R> {
    /// Drops the decoder, releasing its engine.
    /// Reads afterwards fail with `StreamClosed`.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<R: BufRead> Read for ZipEntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Some(reader) => reader.read(buf),
            None => Err(StreamError::StreamClosed.into()),
        }
    }
}
