//! bzip2 adapters
//!
//! bzip2 has exactly one container, so unlike [`deflate`](../deflate/index.html)
//! there's no encoding to pick.

use std::fmt;
use std::io::{self, prelude::*};

use ::bzip2::{Action, Compress, Decompress, Status};
use log::*;

use super::{Level, Session, SessionState, DEFAULT_BUFFER_SIZE};
use crate::result::*;
use crate::stream::{self, DirectReader, DirectSource};

/// Largest work factor libbz2 accepts
const MAX_WORK_FACTOR: u32 = 250;

fn engine_fault(e: &::bzip2::Error) -> FaultCode {
    match e {
        ::bzip2::Error::Sequence => FaultCode::Sequence,
        ::bzip2::Error::Param => FaultCode::BadParameter,
        _ => FaultCode::DataCorrupt,
    }
}

/// A reader that decompresses a bzip2 stream from an underlying reader.
///
/// Built the same three ways as [`InflateReader`](../deflate/struct.InflateReader.html),
/// and follows the same rules at the end of the stream.
pub struct Bzip2Reader<R> {
    reader: R,
    session: Session<Decompress>,
    total_out: u64,
}

impl<R: Read> Bzip2Reader<io::BufReader<R>> {
    pub fn builder(reader: R) -> Bzip2ReaderBuilder<io::BufReader<R>> {
        Bzip2ReaderBuilder::new(io::BufReader::with_capacity(DEFAULT_BUFFER_SIZE, reader))
    }
}

impl<D: DirectSource> Bzip2Reader<DirectReader<D>> {
    pub fn builder_direct(source: D) -> Bzip2ReaderBuilder<DirectReader<D>> {
        Bzip2ReaderBuilder::new(DirectReader::new(source))
    }
}

impl<R: BufRead> Bzip2Reader<R> {
    pub fn builder_buffered(reader: R) -> Bzip2ReaderBuilder<R> {
        Bzip2ReaderBuilder::new(reader)
    }

    fn decode(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        loop {
            let input = self.reader.fill_buf()?;
            let eof = input.is_empty();
            if eof && self.session.state() == SessionState::Init {
                debug!("No bzip2 input at all");
                self.session.finish();
                return Ok(0);
            }

            let engine = self.session.engine()?;
            let (in_before, out_before) = (engine.total_in(), engine.total_out());
            let result = engine.decompress(input, buf);
            let consumed = (engine.total_in() - in_before) as usize;
            let produced = (engine.total_out() - out_before) as usize;

            self.reader.consume(consumed);
            self.total_out += produced as u64;

            match result {
                Ok(Status::StreamEnd) => {
                    self.session.finish();
                    return Ok(produced);
                }
                Ok(Status::MemNeeded) => return Err(self.session.fault(FaultCode::OutOfMemory)),
                Ok(_) => {
                    self.session.running();
                    if produced > 0 {
                        return Ok(produced);
                    }
                    if eof {
                        warn!(
                            "bzip2 input ended after {} bytes without an end-of-stream marker",
                            self.total_out
                        );
                        self.session.finish();
                        return Ok(0);
                    }
                    if consumed == 0 {
                        return Err(self.session.fault(FaultCode::Stalled));
                    }
                }
                Err(e) => return Err(self.session.fault(engine_fault(&e))),
            }
        }
    }
}

impl<R> Bzip2Reader<R> {
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

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

// libbz2's stream state has nothing worth printing.
impl<R: fmt::Debug> fmt::Debug for Bzip2Reader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bzip2Reader")
            .field("reader", &self.reader)
            .field("state", &self.session.state())
            .field("total_out", &self.total_out)
            .finish()
    }
}

impl<R: BufRead> Read for Bzip2Reader<R> {
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

pub struct Bzip2ReaderBuilder<R> {
    reader: R,
    small_memory: bool,
}

impl<R> Bzip2ReaderBuilder<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            small_memory: false,
        }
    }

    /// Decodes with libbz2's slower algorithm that uses about half the memory.
    pub fn with_small_memory(mut self, small_memory: bool) -> Self {
        self.small_memory = small_memory;
        self
    }

    pub fn build(self) -> StreamResult<Bzip2Reader<R>> {
        Ok(Bzip2Reader {
            reader: self.reader,
            session: Session::new(Decompress::new(self.small_memory), Engine::Bzip2),
            total_out: 0,
        })
    }
}

/// A writer that bzip2-compresses everything written to it into an underlying writer.
///
/// Same buffering and lifecycle as [`DeflateWriter`](../deflate/struct.DeflateWriter.html):
/// `flush()` or `finish()` ends the stream.
pub struct Bzip2Writer<W> {
    writer: W,
    session: Session<Compress>,
    buffer: Vec<u8>,
    total_in: u64,
}

impl<W: Write> Bzip2Writer<W> {
    pub fn builder(writer: W) -> Bzip2WriterBuilder<W> {
        Bzip2WriterBuilder::new(writer)
    }

    fn step(&mut self, input: &[u8], action: Action) -> StreamResult<(usize, usize, Status)> {
        let engine = self.session.engine()?;
        let (in_before, out_before) = (engine.total_in(), engine.total_out());
        let result = engine.compress(input, &mut self.buffer, action);
        let consumed = (engine.total_in() - in_before) as usize;
        let produced = (engine.total_out() - out_before) as usize;

        let status = match result {
            Ok(Status::MemNeeded) => return Err(self.session.fault(FaultCode::OutOfMemory)),
            Ok(status) => status,
            Err(e) => return Err(self.session.fault(engine_fault(&e))),
        };
        stream::write_exact(&mut self.writer, &self.buffer[..produced])?;
        Ok((consumed, produced, status))
    }

    fn encode(&mut self, data: &[u8]) -> StreamResult<usize> {
        self.session.engine()?;
        self.session.running();

        // libbz2 treats a step that can't make progress as a parameter error,
        // so stop as soon as the input is in. Anything still pending inside
        // the engine comes out on a later step.
        let mut consumed = 0;
        while consumed < data.len() {
            let (used, produced, _) = self.step(&data[consumed..], Action::Run)?;
            consumed += used;
            if used == 0 && produced == 0 {
                return Err(self.session.fault(FaultCode::Stalled));
            }
        }
        self.total_in += data.len() as u64;
        Ok(data.len())
    }

    fn finish_stream(&mut self) -> StreamResult<()> {
        loop {
            let (_, produced, status) = self.step(&[], Action::Finish)?;
            if status == Status::StreamEnd {
                break;
            }
            if produced == 0 {
                return Err(self.session.fault(FaultCode::Stalled));
            }
        }
        self.session.finish();
        debug!("bzip2-compressed {} bytes", self.total_in);
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

impl<W> Bzip2Writer<W> {
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn close(&mut self) {
        self.session.close();
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: fmt::Debug> fmt::Debug for Bzip2Writer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bzip2Writer")
            .field("writer", &self.writer)
            .field("state", &self.session.state())
            .field("total_in", &self.total_in)
            .finish()
    }
}

impl<W: Write> Write for Bzip2Writer<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.encode(data).map_err(|e| {
            self.session.abort();
            e.into()
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.finish()?)
    }
}

pub struct Bzip2WriterBuilder<W> {
    writer: W,
    level: Level,
    work_factor: u32,
    buffer_size: usize,
}

impl<W> Bzip2WriterBuilder<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            level: Level::default(),
            work_factor: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// How much effort to spend on highly repetitive input before
    /// falling back to a slower sorting algorithm, from 1 to 250.
    /// 0 picks libbz2's default (30).
    pub fn with_work_factor(mut self, work_factor: u32) -> Self {
        self.work_factor = work_factor;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be greater than 0");

        self.buffer_size = buffer_size;
        self
    }

    pub fn build(self) -> StreamResult<Bzip2Writer<W>> {
        if self.work_factor > MAX_WORK_FACTOR {
            return Err(StreamError::InvalidLevel(format!(
                "work factor {} (must be 0-{})",
                self.work_factor, MAX_WORK_FACTOR
            )));
        }
        debug!(
            "bzip2-compressing at {:?}, work factor {}",
            self.level, self.work_factor
        );
        Ok(Bzip2Writer {
            writer: self.writer,
            session: Session::new(
                Compress::new(self.level.bzip2(), self.work_factor),
                Engine::Bzip2,
            ),
            buffer: vec![0; self.buffer_size],
            total_in: 0,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryStream;
    use assert_matches::assert_matches;

    const TEXT: &[u8] = b"She sells sea shells by the sea shore. The shells she sells are sea shells, I'm sure.";

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut writer = Bzip2Writer::builder(Vec::new()).build().unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_through_memory() {
        let mut memory = MemoryStream::new();
        let mut writer = Bzip2Writer::builder(&mut memory)
            .with_level(Level::Best)
            .build()
            .unwrap();
        writer.write_all(TEXT).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.total_in(), TEXT.len() as u64);
        drop(writer);
        assert_eq!(&memory.as_slice()[..3], b"BZh");

        memory.seek_to(io::SeekFrom::Start(0)).unwrap();
        let mut reader = Bzip2Reader::builder_direct(&mut memory).build().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, TEXT);
        assert_eq!(reader.state(), SessionState::Finished);
        drop(reader);
        assert_eq!(memory.position(), memory.len());
    }

    #[test]
    fn test_small_memory_decoding() {
        let compressed = compress(TEXT);
        let mut reader = Bzip2Reader::builder(&compressed[..])
            .with_small_memory(true)
            .build()
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, TEXT);

        let mut buf = [0; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_bad_magic() {
        let mut reader = Bzip2Reader::builder(&b"PK\x03\x04 not bzip2 at all"[..])
            .build()
            .unwrap();
        let mut buf = [0; 64];
        assert_matches!(
            StreamError::from(reader.read(&mut buf).unwrap_err()),
            StreamError::EngineFault {
                engine: Engine::Bzip2,
                code: FaultCode::DataCorrupt
            }
        );
        assert_eq!(reader.state(), SessionState::Closed);
        assert_matches!(
            StreamError::from(reader.read(&mut buf).unwrap_err()),
            StreamError::StreamClosed
        );
    }

    #[test]
    fn test_truncated_input_ends_the_stream() {
        let compressed = compress(TEXT);
        let truncated = &compressed[..compressed.len() / 2];
        let mut reader = Bzip2Reader::builder(truncated).build().unwrap();
        let mut out = Vec::new();
        // Whatever made it out before the input ran dry
        reader.read_to_end(&mut out).unwrap();
        assert!(out.len() < TEXT.len());
        assert_eq!(reader.state(), SessionState::Finished);
    }

    #[test]
    fn test_work_factor_is_checked() {
        assert_matches!(
            Bzip2Writer::builder(Vec::new()).with_work_factor(251).build(),
            Err(StreamError::InvalidLevel(_))
        );
        let mut writer = Bzip2Writer::builder(Vec::new())
            .with_work_factor(250)
            .with_level(Level::Fast)
            .build()
            .unwrap();
        writer.write_all(TEXT).unwrap();
        writer.finish().unwrap();
        assert!(!writer.get_ref().is_empty());
    }

    #[test]
    fn test_closed_writer() {
        let mut writer = Bzip2Writer::builder(Vec::new()).build().unwrap();
        writer.write_all(TEXT).unwrap();
        writer.close();
        writer.close();
        assert_eq!(writer.state(), SessionState::Closed);
        assert_matches!(writer.finish(), Err(StreamError::StreamClosed));
        assert_matches!(
            StreamError::from(writer.write(b"more").unwrap_err()),
            StreamError::StreamClosed
        );
    }
}
