//! A growable in-memory stream.

use std::io::{self, prelude::*, SeekFrom};
use std::ops::Range;

use crate::result::*;
use crate::stream::{self, DirectSource};

/// A byte buffer you can read, write, and seek like a file.
///
/// Unlike [`std::io::Cursor`], seeking past the end is an error
/// instead of silently leaving a gap to be zero-filled.
/// Since the bytes live in memory, it's also a [`DirectSource`].
///
/// [`DirectSource`]: ../stream/trait.DirectSource.html
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStream {
    data: Vec<u8>,
    position: usize,
}

impl MemoryStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty stream with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Length of the whole stream, regardless of position
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read/write offset from the start
    pub fn position(&self) -> usize {
        self.position
    }

    /// All of the stream's bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Unwraps the stream, returning its bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Seeks, returning our own error type instead of an `io::Error`.
    pub fn seek_to(&mut self, pos: SeekFrom) -> StreamResult<u64> {
        Ok(self.seek(pos)?)
    }
}

impl From<Vec<u8>> for MemoryStream {
    fn from(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl From<&[u8]> for MemoryStream {
    fn from(data: &[u8]) -> Self {
        Self::from(data.to_vec())
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = &self.data[self.position..];
        let amount = available.len().min(buf.len());
        buf[..amount].copy_from_slice(&available[..amount]);
        self.position += amount;
        Ok(amount)
    }
}

impl BufRead for MemoryStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(&self.data[self.position..])
    }

    fn consume(&mut self, amount: usize) {
        self.position = (self.position + amount).min(self.data.len());
    }
}

impl Write for MemoryStream {
    /// Overwrites from the cursor, growing the buffer as needed.
    /// Always writes everything.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let overlap = (self.data.len() - self.position).min(buf.len());
        let (overwrite, append) = buf.split_at(overlap);
        self.data[self.position..self.position + overlap].copy_from_slice(overwrite);
        self.data.extend_from_slice(append);
        self.position += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = stream::seek_target(self.position as u64, self.data.len() as u64, pos)?;
        // seek_target() keeps us within the buffer, which already fits in memory.
        self.position = target as usize;
        Ok(target)
    }
}

impl DirectSource for MemoryStream {
    fn position(&self) -> usize {
        self.position
    }

    fn length(&self) -> usize {
        self.data.len()
    }

    fn direct(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    fn consume(&mut self, amount: usize) {
        BufRead::consume(self, amount)
    }
}
