//! Error types and the related `Result<T>`

use std::fmt;
use std::io;

use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

/// The compression engine behind a codec session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Engine {
    Deflate,
    Bzip2,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Deflate => f.write_str("DEFLATE"),
            Engine::Bzip2 => f.write_str("bzip2"),
        }
    }
}

/// A fatal status reported by a compression engine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultCode {
    /// The stream needs a preset dictionary we don't have.
    NeedDictionary,
    /// The compressed data is corrupt (including bad magic numbers).
    DataCorrupt,
    /// The engine couldn't allocate its working memory.
    OutOfMemory,
    /// The engine rejected its parameters.
    BadParameter,
    /// The engine was driven out of order.
    Sequence,
    /// The engine neither consumed input nor produced output.
    Stalled,
}

#[derive(Debug, Error)]
pub enum StreamError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[source] io::Error),

    /// A codec was asked for an encoding it doesn't understand
    #[error("Invalid codec encoding: {0}")]
    InvalidEncoding(String),

    /// A codec was asked for a compression level it doesn't understand
    #[error("Invalid compression level: {0}")]
    InvalidLevel(String),

    /// The compression engine reported a fatal status
    #[error("{engine} engine fault: {code:?}")]
    EngineFault { engine: Engine, code: FaultCode },

    /// The codec session was already finished or closed
    #[error("Stream is closed")]
    StreamClosed,

    /// An exact-length read came up short
    #[error("Short read: wanted {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// An exact-length write came up short
    #[error("Short write: wanted {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// A seek would land before the start or past the end of the stream
    #[error("Seek to {position} is outside a stream of {length} bytes")]
    SeekOutOfRange { position: i128, length: u64 },

    /// The ZIP archive contained invalid data per the ZIP format.
    #[error("Invalid Zip archive: {0}")]
    MalformedArchive(&'static str),

    /// An entry uses a compression method we can't decode
    #[error("Unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// Decoded data didn't match its stored CRC-32
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A cast from a 64-bit int to a usize failed while sizing a buffer,
    /// probably on a 32-bit system.
    #[error("Value too large for address space")]
    InsufficientAddressSpace,
}

impl StreamError {
    fn io_kind(&self) -> io::ErrorKind {
        match self {
            StreamError::Io(e) => e.kind(),
            StreamError::InvalidEncoding(_)
            | StreamError::InvalidLevel(_)
            | StreamError::SeekOutOfRange { .. } => io::ErrorKind::InvalidInput,
            StreamError::ShortRead { .. } => io::ErrorKind::UnexpectedEof,
            StreamError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            StreamError::UnsupportedMethod(_) | StreamError::UnsupportedArchive(_) => {
                io::ErrorKind::Unsupported
            }
            StreamError::InsufficientAddressSpace => io::ErrorKind::OutOfMemory,
            StreamError::StreamClosed => io::ErrorKind::Other,
            StreamError::EngineFault { .. }
            | StreamError::MalformedArchive(_)
            | StreamError::ChecksumMismatch { .. }
            | StreamError::Encoding(_) => io::ErrorKind::InvalidData,
        }
    }
}

/// Lets `std::io` adapters carry our errors.
impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> io::Error {
        match e {
            StreamError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

/// Unwraps a `StreamError` that traveled through an `io::Error`,
/// so callers see the original kind.
impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> StreamError {
        if !e.get_ref().is_some_and(|inner| inner.is::<StreamError>()) {
            return StreamError::Io(e);
        }
        let kind = e.kind();
        match e.into_inner().map(|inner| inner.downcast::<StreamError>()) {
            Some(Ok(ours)) => *ours,
            Some(Err(other)) => StreamError::Io(io::Error::new(kind, other)),
            None => StreamError::Io(kind.into()),
        }
    }
}
