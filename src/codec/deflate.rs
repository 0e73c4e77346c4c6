//! DEFLATE adapters, with or without a zlib or gzip container.

use std::fmt;
use std::io::{self, prelude::*};
use std::str::FromStr;

use crc32fast::Hasher;
use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};
use log::*;

use super::{gzip, Level, Session, SessionState, DEFAULT_BUFFER_SIZE};
use crate::result::*;
use crate::stream::{self, DirectReader, DirectSource};

/// The container around a DEFLATE stream
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// A zlib stream (RFC 1950)
    #[default]
    Zlib,
    /// A gzip member (RFC 1952)
    Gzip,
    /// Zlib or gzip, decided by the first byte of input. Only valid for decoding.
    Guess,
    /// Raw DEFLATE (RFC 1951), as found inside ZIP archives
    None,
}

impl Encoding {
    /// Whether the engine itself handles a zlib header and trailer
    fn zlib_header(self) -> bool {
        matches!(self, Encoding::Zlib | Encoding::Guess)
    }
}

impl FromStr for Encoding {
    type Err = StreamError;

    fn from_str(s: &str) -> StreamResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zlib" => Ok(Encoding::Zlib),
            "gzip" => Ok(Encoding::Gzip),
            "guess" => Ok(Encoding::Guess),
            "none" | "raw" => Ok(Encoding::None),
            _ => Err(StreamError::InvalidEncoding(s.to_owned())),
        }
    }
}

fn decompress_fault(e: &flate2::DecompressError) -> FaultCode {
    if e.needs_dictionary().is_some() {
        FaultCode::NeedDictionary
    } else {
        FaultCode::DataCorrupt
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Frame {
    Header,
    Body,
    Done,
}

/// A reader that decompresses a DEFLATE stream from an underlying reader.
///
/// The underlying reader must implement [`BufRead`]: its buffer is what we
/// hand the engine. Pick one of three constructors:
///
/// - [`InflateReader::builder`] wraps any [`Read`] in a [`BufReader`].
/// - [`InflateReader::builder_direct`] borrows straight from a
///   [`DirectSource`]'s memory, so the compressed bytes are never copied.
/// - [`InflateReader::builder_buffered`] uses your [`BufRead`] as-is.
///
/// ```
/// # use std::io::Read;
/// # use layerio::codec::{Encoding, InflateReader};
/// # use layerio::memory::MemoryStream;
/// let compressed = MemoryStream::from(
///     &[0x78, 0x9c, 0x4b, 0x29, 0xca, 0x4f, 0xce, 0x2e, 0x06, 0x00, 0x08, 0xc6, 0x02, 0x87][..],
/// );
/// let mut reader = InflateReader::builder_direct(compressed)
///     .with_encoding(Encoding::Guess)
///     .build()?;
/// let mut text = String::new();
/// reader.read_to_string(&mut text)?;
/// assert_eq!(text, "drocks");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// When the engine sees the end-of-stream marker, the read that got there
/// returns what it produced and every read after it returns 0.
/// Input that runs out before the marker is also treated as the end.
///
/// [`BufRead`]: std::io::BufRead
/// [`Read`]: std::io::Read
/// [`BufReader`]: std::io::BufReader
/// [`DirectSource`]: ../../stream/trait.DirectSource.html
pub struct InflateReader<R> {
    reader: R,
    encoding: Encoding,
    session: Session<Decompress>,
    frame: Frame,
    crc: Hasher,
    total_out: u64,
}

impl<R: Read> InflateReader<io::BufReader<R>> {
    pub fn builder(reader: R) -> InflateReaderBuilder<io::BufReader<R>> {
        InflateReaderBuilder::new(io::BufReader::with_capacity(DEFAULT_BUFFER_SIZE, reader))
    }
}

impl<D: DirectSource> InflateReader<DirectReader<D>> {
    pub fn builder_direct(source: D) -> InflateReaderBuilder<DirectReader<D>> {
        InflateReaderBuilder::new(DirectReader::new(source))
    }
}

impl<R: BufRead> InflateReader<R> {
    pub fn builder_buffered(reader: R) -> InflateReaderBuilder<R> {
        InflateReaderBuilder::new(reader)
    }

    /// Parses whatever container precedes the DEFLATE body.
    fn start(&mut self) -> StreamResult<()> {
        if self.encoding == Encoding::Guess {
            let first = self.reader.fill_buf()?.first().copied();
            self.encoding = match first {
                Some(byte) if gzip::is_gzip(byte) => Encoding::Gzip,
                _ => Encoding::Zlib,
            };
            debug!("Guessed {:?} encoding", self.encoding);
            if self.encoding == Encoding::Gzip {
                self.session.replace(Decompress::new(false));
            }
        }
        if self.encoding == Encoding::Gzip {
            gzip::read_header(&mut self.reader)?;
        }
        self.frame = Frame::Body;
        Ok(())
    }

    fn decode(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        if self.frame == Frame::Header {
            if self.reader.fill_buf()?.is_empty() {
                debug!("No {} input at all", self.session.kind());
                self.session.finish();
                return Ok(0);
            }
            self.start()?;
        }

        loop {
            let input = self.reader.fill_buf()?;
            let eof = input.is_empty();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let engine = self.session.engine()?;
            let (in_before, out_before) = (engine.total_in(), engine.total_out());
            let result = engine.decompress(input, buf, flush);
            let consumed = (engine.total_in() - in_before) as usize;
            let produced = (engine.total_out() - out_before) as usize;

            self.reader.consume(consumed);
            self.total_out += produced as u64;
            if self.encoding == Encoding::Gzip {
                self.crc.update(&buf[..produced]);
            }

            match result {
                Ok(Status::StreamEnd) => {
                    self.end_of_body()?;
                    return Ok(produced);
                }
                Ok(Status::Ok) | Ok(Status::BufError) => {
                    if produced > 0 {
                        self.session.running();
                        return Ok(produced);
                    }
                    if eof {
                        warn!(
                            "DEFLATE input ended after {} bytes without an end-of-stream marker",
                            self.total_out
                        );
                        self.session.finish();
                        return Ok(0);
                    }
                    if consumed == 0 {
                        return Err(self.session.fault(FaultCode::Stalled));
                    }
                }
                Err(e) => return Err(self.session.fault(decompress_fault(&e))),
            }
        }
    }

    fn end_of_body(&mut self) -> StreamResult<()> {
        if self.encoding == Encoding::Gzip {
            gzip::check_trailer(&mut self.reader, self.crc.clone().finalize(), self.total_out)?;
        }
        self.frame = Frame::Done;
        self.session.finish();
        Ok(())
    }
}

impl<R> InflateReader<R> {
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The encoding being decoded. `Guess` resolves once reading starts.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decompressed bytes produced so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Releases the engine. Reads afterwards fail with `StreamClosed`.
    pub fn close(&mut self) {
        self.session.close();
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: fmt::Debug> fmt::Debug for InflateReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflateReader")
            .field("reader", &self.reader)
            .field("encoding", &self.encoding)
            .field("state", &self.session.state())
            .field("total_out", &self.total_out)
            .finish()
    }
}

impl<R: BufRead> Read for InflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.session.state() {
            SessionState::Finished => return Ok(0),
            SessionState::Closed => return Err(StreamError::StreamClosed.into()),
            SessionState::Init | SessionState::Running => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.decode(buf).map_err(|e| {
            self.session.abort();
            e.into()
        })
    }
}

/// Builds an [`InflateReader`]
///
/// [`InflateReader`]: struct.InflateReader.html
pub struct InflateReaderBuilder<R> {
    reader: R,
    encoding: Encoding,
}

impl<R> InflateReaderBuilder<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            encoding: Encoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn build(self) -> StreamResult<InflateReader<R>> {
        let engine = Decompress::new(self.encoding.zlib_header());
        debug!("Inflating {:?}", self.encoding);
        Ok(InflateReader {
            reader: self.reader,
            encoding: self.encoding,
            session: Session::new(engine, Engine::Deflate),
            frame: Frame::Header,
            crc: Hasher::new(),
            total_out: 0,
        })
    }
}

/// A writer that DEFLATE-compresses everything written to it into an underlying writer.
///
/// Compressed output collects in a fixed-size buffer that's written out to the
/// sink every time the engine produces some, so memory use doesn't grow with the input.
///
/// [`finish()`] (or [`flush()`]) ends the stream: it drains the engine,
/// writes any container trailer, and releases the engine.
/// Writes afterwards fail with `StreamClosed`.
/// Dropping the writer without finishing abandons the stream.
///
/// [`finish()`]: struct.DeflateWriter.html#method.finish
/// [`flush()`]: struct.DeflateWriter.html#impl-Write
pub struct DeflateWriter<W> {
    writer: W,
    encoding: Encoding,
    level: Level,
    session: Session<Compress>,
    buffer: Vec<u8>,
    crc: Hasher,
    total_in: u64,
}

impl<W: Write> DeflateWriter<W> {
    pub fn builder(writer: W) -> DeflateWriterBuilder<W> {
        DeflateWriterBuilder::new(writer)
    }

    /// Runs one engine step and writes out whatever it produced.
    /// Returns bytes consumed, bytes produced, and the engine's status.
    fn step(&mut self, input: &[u8], flush: FlushCompress) -> StreamResult<(usize, usize, Status)> {
        let engine = self.session.engine()?;
        let (in_before, out_before) = (engine.total_in(), engine.total_out());
        let result = engine.compress(input, &mut self.buffer, flush);
        let consumed = (engine.total_in() - in_before) as usize;
        let produced = (engine.total_out() - out_before) as usize;

        let status = match result {
            Ok(status) => status,
            Err(_) => return Err(self.session.fault(FaultCode::BadParameter)),
        };
        stream::write_exact(&mut self.writer, &self.buffer[..produced])?;
        Ok((consumed, produced, status))
    }

    fn start(&mut self) -> StreamResult<()> {
        if self.session.state() == SessionState::Init {
            if self.encoding == Encoding::Gzip {
                gzip::write_header(&mut self.writer, self.level)?;
            }
            self.session.running();
        }
        Ok(())
    }

    fn encode(&mut self, data: &[u8]) -> StreamResult<usize> {
        self.session.engine()?;
        self.start()?;

        let mut consumed = 0;
        loop {
            let (used, produced, _) = self.step(&data[consumed..], FlushCompress::None)?;
            consumed += used;
            // A buffer with room to spare means the engine has nothing else pending.
            if consumed == data.len() && produced < self.buffer.len() {
                break;
            }
            if used == 0 && produced == 0 {
                return Err(self.session.fault(FaultCode::Stalled));
            }
        }

        self.crc.update(data);
        self.total_in += data.len() as u64;
        Ok(data.len())
    }

    fn finish_stream(&mut self) -> StreamResult<()> {
        self.start()?;
        loop {
            let (_, produced, status) = self.step(&[], FlushCompress::Finish)?;
            if status == Status::StreamEnd {
                break;
            }
            if produced == 0 {
                return Err(self.session.fault(FaultCode::Stalled));
            }
        }
        if self.encoding == Encoding::Gzip {
            gzip::write_trailer(&mut self.writer, self.crc.clone().finalize(), self.total_in)?;
        }
        self.session.finish();
        debug!("Deflated {} bytes", self.total_in);
        Ok(self.writer.flush()?)
    }

    /// Ends the compressed stream and releases the engine.
    ///
    /// Finishing a finished writer does nothing.
    pub fn finish(&mut self) -> StreamResult<()> {
        match self.session.state() {
            SessionState::Finished => return Ok(()),
            SessionState::Closed => return Err(StreamError::StreamClosed),
            SessionState::Init | SessionState::Running => {}
        }
        self.finish_stream().map_err(|e| {
            self.session.abort();
            e
        })
    }
}

impl<W> DeflateWriter<W> {
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Uncompressed bytes written so far
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Releases the engine without finishing the stream.
    pub fn close(&mut self) {
        self.session.close();
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the underlying writer. Call `finish()` first
    /// unless you mean to abandon the stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: fmt::Debug> fmt::Debug for DeflateWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeflateWriter")
            .field("writer", &self.writer)
            .field("encoding", &self.encoding)
            .field("level", &self.level)
            .field("state", &self.session.state())
            .field("total_in", &self.total_in)
            .finish()
    }
}

impl<W: Write> Write for DeflateWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.encode(data).map_err(|e| {
            self.session.abort();
            e.into()
        })
    }

    /// Finishes the stream. See [`finish()`](#method.finish).
    fn flush(&mut self) -> io::Result<()> {
        Ok(self.finish()?)
    }
}

/// Builds a [`DeflateWriter`]
///
/// [`DeflateWriter`]: struct.DeflateWriter.html
pub struct DeflateWriterBuilder<W> {
    writer: W,
    encoding: Encoding,
    level: Level,
    buffer_size: usize,
}

impl<W> DeflateWriterBuilder<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            encoding: Encoding::default(),
            level: Level::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be greater than 0");

        self.buffer_size = buffer_size;
        self
    }

    pub fn build(self) -> StreamResult<DeflateWriter<W>> {
        if self.encoding == Encoding::Guess {
            return Err(StreamError::InvalidEncoding(String::from(
                "guess (only meaningful when decompressing)",
            )));
        }
        let engine = Compress::new(self.level.deflate(), self.encoding.zlib_header());
        debug!("Deflating {:?} at {:?}", self.encoding, self.level);
        Ok(DeflateWriter {
            writer: self.writer,
            encoding: self.encoding,
            level: self.level,
            session: Session::new(engine, Engine::Deflate),
            buffer: vec![0; self.buffer_size],
            crc: Hasher::new(),
            total_in: 0,
        })
    }
}
