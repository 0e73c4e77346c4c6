//! layerio is a set of byte streams that stack on top of each other:
//! in-memory buffers, bounded slices of other streams,
//! DEFLATE (zlib, gzip, raw) and bzip2 codecs, and a ZIP archive reader
//! built out of all of the above.
//!
//! Everything speaks plain `std::io`, so layers compose with each other
//! and with the rest of the ecosystem:
//!
//! ```
//! # use std::io::{Read, Write};
//! # use layerio::codec::{DeflateWriter, Encoding, InflateReader, Level};
//! # use layerio::memory::MemoryStream;
//! let mut compressed = MemoryStream::new();
//! let mut writer = DeflateWriter::builder(&mut compressed)
//!     .with_encoding(Encoding::Gzip)
//!     .with_level(Level::Best)
//!     .build()?;
//! writer.write_all(b"Hello, layers!")?;
//! writer.finish()?;
//! drop(writer);
//!
//! // MemoryStream is a DirectSource, so decompression reads straight
//! // out of its buffer.
//! compressed.seek_to(std::io::SeekFrom::Start(0))?;
//! let mut reader = InflateReader::builder_direct(&mut compressed)
//!     .with_encoding(Encoding::Guess)
//!     .build()?;
//! let mut text = String::new();
//! reader.read_to_string(&mut text)?;
//! assert_eq!(text, "Hello, layers!");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A ZIP archive can sit on any seekable stream. Files work,
//! and for larger archives, so does a `Cursor` over a memory map:
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use layerio::read::ZipArchive;
//! let mut archive = ZipArchive::new(File::open("foo.zip")?)?;
//! let entry = archive.entry("some/specific/file").cloned().expect("no such file");
//! let mut reader = archive.read(&entry)?;
//! io::copy(&mut reader, &mut io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each entry in a ZIP archive is compressed independently, so entries opened
//! on separate streams with [`read::open_entry`] can be read in parallel.
//! When the archive is already in memory (say, a memory map), [`read::open_entry_direct`]
//! hands the decoders the mapped bytes without copying them into a buffer first.
//!
//! [`read::open_entry`]: read/fn.open_entry.html
//! [`read::open_entry_direct`]: read/fn.open_entry_direct.html

pub mod codec;
pub mod cp437;
pub mod memory;
pub mod read;
pub mod result;
pub mod slice;
pub mod stream;

pub use memory::MemoryStream;
pub use read::{CompressionMethod, ZipArchive, ZipEntry};
pub use result::{StreamError, StreamResult};
pub use slice::SliceStream;

mod arch;
mod crc_reader;
mod spec;
