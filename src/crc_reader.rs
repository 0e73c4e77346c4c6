//! Checks a CRC-32 over everything read through it

use std::fmt;
use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

use crate::result::*;

/// Reader that validates the CRC-32 when its inner reader hits EOF.
///
/// A mismatch is reported (as [`ChecksumMismatch`]) by the read that would
/// have returned 0, and again by any read after it.
///
/// [`ChecksumMismatch`]: ../result/enum.StreamError.html#variant.ChecksumMismatch
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn check(&self) -> StreamResult<()> {
        let actual = self.hasher.clone().finalize();
        if actual == self.expected {
            Ok(())
        } else {
            Err(StreamError::ChecksumMismatch {
                expected: self.expected,
                actual,
            })
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Crc32Reader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32Reader")
            .field("inner", &self.inner)
            .field("expected", &format_args!("{:#010x}", self.expected))
            .finish()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.check()?;
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_reader() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(data, 1);
        assert_matches!(
            StreamError::from(reader.read(&mut buf).unwrap_err()),
            StreamError::ChecksumMismatch {
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn test_byte_by_byte() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3);
        for expected in b"1234" {
            assert_eq!(reader.read(&mut buf).unwrap(), 1);
            assert_eq!(buf[0], *expected);
        }
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        // Still fine the second time around
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_zero_length_reads_skip_the_check() {
        let data: &[u8] = b"1234";
        let mut reader = Crc32Reader::new(data, 0xdeadbeef);
        assert_eq!(reader.read(&mut []).unwrap(), 0);

        let mut contents = Vec::new();
        let err = reader.read_to_end(&mut contents).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(contents, b"1234");
    }
}
