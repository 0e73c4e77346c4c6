//! Bounded, read-only views of another stream.

use std::io::{self, prelude::*, SeekFrom};
use std::ops::Range;

use log::*;

use crate::result::*;
use crate::stream::{self, DirectSource};

/// A read-only view of `[start, start + length)` bytes of a seekable stream.
///
/// The slice keeps its own cursor. The wrapped stream's cursor is only
/// trusted if it's exactly where the slice expects it: before each read we
/// check, and re-seek if something else moved it. That makes it safe
/// (if slow) for other code to seek the underlying stream between reads.
#[derive(Debug)]
pub struct SliceStream<R> {
    inner: R,
    start: u64,
    length: u64,
    position: u64,
}

impl<R: Seek> SliceStream<R> {
    /// Creates a view of `length` bytes starting at `start`.
    ///
    /// Fails with [`SeekOutOfRange`] if the view would extend
    /// past the end of `inner`.
    ///
    /// [`SeekOutOfRange`]: ../result/enum.StreamError.html#variant.SeekOutOfRange
    pub fn new(mut inner: R, start: u64, length: u64) -> StreamResult<Self> {
        let inner_length = stream::stream_length(&mut inner)?;
        let end = start.checked_add(length).ok_or(StreamError::SeekOutOfRange {
            position: start as i128 + length as i128,
            length: inner_length,
        })?;
        if end > inner_length {
            return Err(StreamError::SeekOutOfRange {
                position: end as i128,
                length: inner_length,
            });
        }
        Ok(Self {
            inner,
            start,
            length,
            position: 0,
        })
    }
}

impl<R> SliceStream<R> {
    /// Where the slice starts in the underlying stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the slice, in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The slice's own read position, relative to `start()`
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Gets the underlying stream.
    ///
    /// Moving its cursor is fine; the slice will seek back before its next read.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwraps the slice, returning the underlying stream
    /// wherever its cursor happens to be.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SliceStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.position;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let expected = self.start + self.position;
        if self.inner.stream_position()? != expected {
            trace!("Repositioning slice source to {}", expected);
            self.inner.seek(SeekFrom::Start(expected))?;
        }

        let amount = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let read = self.inner.read(&mut buf[..amount])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<R> Seek for SliceStream<R> {
    /// Moves the slice's cursor. No I/O happens until the next read.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = stream::seek_target(self.position, self.length, pos)?;
        Ok(self.position)
    }
}

/// A slice of a memory-resident stream is itself memory-resident.
impl<D: DirectSource> DirectSource for SliceStream<D> {
    fn position(&self) -> usize {
        // new() checked start + length against the source,
        // whose length is a usize.
        self.position as usize
    }

    fn length(&self) -> usize {
        self.length as usize
    }

    fn direct(&self, range: Range<usize>) -> &[u8] {
        let start = self.start as usize;
        self.inner.direct(start + range.start..start + range.end)
    }

    fn consume(&mut self, amount: usize) {
        self.position = (self.position + amount as u64).min(self.length);
    }
}
