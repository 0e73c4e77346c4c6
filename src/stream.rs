//! The stream capabilities everything else is built on.
//!
//! Most of the model is plain `std::io`:
//!
//! - A *source* is [`Read`]. `Ok(0)` means the input is exhausted;
//!   it's an expected terminal signal, not an error.
//! - A *sink* is [`Write`]. We never accept partial writes:
//!   everything in this crate writes through [`write_exact()`].
//! - A *seekable* stream is [`Seek`]. The streams this crate implements
//!   refuse positions before the start or past the logical end.
//!
//! The one addition is [`DirectSource`], for streams whose bytes already
//! sit in memory. Codecs use it to hand the engine a borrowed view of the
//! source instead of copying into their own input buffer.
//!
//! [`Read`]: std::io::Read
//! [`Write`]: std::io::Write
//! [`Seek`]: std::io::Seek
//! [`write_exact()`]: fn.write_exact.html
//! [`DirectSource`]: trait.DirectSource.html

use std::io::{self, prelude::*, SeekFrom};
use std::ops::Range;

use crate::result::*;

/// A source whose contents are resident in memory
/// and can be borrowed without copying.
pub trait DirectSource {
    /// The current read position
    fn position(&self) -> usize;

    /// The total length of the source, in bytes
    fn length(&self) -> usize;

    /// Borrows `range` of the underlying buffer.
    ///
    /// ## Panics
    ///
    /// Implementations may panic if the range isn't within `0..length()`.
    fn direct(&self, range: Range<usize>) -> &[u8];

    /// Advances the read position by `amount` bytes,
    /// clamped to the end of the source.
    fn consume(&mut self, amount: usize);

    /// Borrows everything from the current position to the end.
    fn remaining(&self) -> &[u8] {
        self.direct(self.position()..self.length())
    }
}

impl<D: DirectSource + ?Sized> DirectSource for &mut D {
    fn position(&self) -> usize {
        (**self).position()
    }

    fn length(&self) -> usize {
        (**self).length()
    }

    fn direct(&self, range: Range<usize>) -> &[u8] {
        (**self).direct(range)
    }

    fn consume(&mut self, amount: usize) {
        (**self).consume(amount)
    }
}

impl<T: AsRef<[u8]>> DirectSource for io::Cursor<T> {
    fn position(&self) -> usize {
        // A cursor can be parked past its end.
        usize::try_from(io::Cursor::position(self))
            .unwrap_or(usize::MAX)
            .min(self.length())
    }

    fn length(&self) -> usize {
        self.get_ref().as_ref().len()
    }

    fn direct(&self, range: Range<usize>) -> &[u8] {
        &self.get_ref().as_ref()[range]
    }

    fn consume(&mut self, amount: usize) {
        let next = DirectSource::position(self)
            .saturating_add(amount)
            .min(self.length());
        self.set_position(next as u64);
    }
}

/// Adapts a [`DirectSource`] into a [`BufRead`] whose buffer
/// *is* the source's memory, so nothing gets copied on the way to a codec.
///
/// [`DirectSource`]: trait.DirectSource.html
/// [`BufRead`]: std::io::BufRead
#[derive(Debug)]
pub struct DirectReader<D> {
    source: D,
}

impl<D: DirectSource> DirectReader<D> {
    pub fn new(source: D) -> Self {
        Self { source }
    }

    pub fn get_ref(&self) -> &D {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut D {
        &mut self.source
    }

    pub fn into_inner(self) -> D {
        self.source
    }
}

impl<D: DirectSource> Read for DirectReader<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.source.remaining();
        let amount = available.len().min(buf.len());
        buf[..amount].copy_from_slice(&available[..amount]);
        self.source.consume(amount);
        Ok(amount)
    }
}

impl<D: DirectSource> BufRead for DirectReader<D> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.source.remaining())
    }

    fn consume(&mut self, amount: usize) {
        self.source.consume(amount)
    }
}

/// Reads exactly `buf.len()` bytes, failing with [`ShortRead`]
/// if the source runs dry first.
///
/// [`ShortRead`]: ../result/enum.StreamError.html#variant.ShortRead
pub fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> StreamResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(StreamError::ShortRead {
                    expected: buf.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Writes all of `buf`, failing with [`ShortWrite`]
/// if the sink stops accepting bytes.
///
/// [`ShortWrite`]: ../result/enum.StreamError.html#variant.ShortWrite
pub fn write_exact<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> StreamResult<()> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(StreamError::ShortWrite {
                    expected: buf.len(),
                    actual: written,
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Resolves `pos` against a stream at `current` with logical end `end`,
/// refusing anything before the start or past the end.
pub fn seek_target(current: u64, end: u64, pos: SeekFrom) -> StreamResult<u64> {
    let target: i128 = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => end as i128 + delta as i128,
    };
    if target < 0 || target > end as i128 {
        return Err(StreamError::SeekOutOfRange {
            position: target,
            length: end,
        });
    }
    Ok(target as u64)
}

/// Measures a seekable stream, putting its cursor back where it was.
pub fn stream_length<S: Seek + ?Sized>(stream: &mut S) -> StreamResult<u64> {
    let current = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    if current != end {
        stream.seek(SeekFrom::Start(current))?;
    }
    Ok(end)
}
