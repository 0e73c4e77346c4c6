//! Compression codec adapters.
//!
//! Each adapter wraps one stream and one compression engine,
//! and moves through the same states:
//!
//! ```plain
//! Init --> Running --> Finished   (end-of-stream marker seen, or writer finished)
//!   \         \
//!    `---------`-----> Closed     (close(), or a fatal error)
//! ```
//!
//! The engine is dropped, and its native resources released,
//! the first time the session leaves `Init`/`Running`. Reading a `Finished`
//! decoder returns 0; everything else on a released session fails with
//! [`StreamClosed`].
//!
//! [`StreamClosed`]: ../result/enum.StreamError.html#variant.StreamClosed

use std::str::FromStr;

use log::*;

use crate::result::*;

pub mod bzip2;
pub mod deflate;
pub mod gzip;

pub use self::bzip2::{Bzip2Reader, Bzip2Writer};
pub use self::deflate::{DeflateWriter, Encoding, InflateReader};

/// Size of the buffers codecs use for input they copy
/// and output they haven't written yet.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// How hard to try when compressing
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    None,
    Fast,
    #[default]
    Normal,
    Best,
}

impl Level {
    /// The level on zlib's 0-9 scale
    pub fn deflate(self) -> flate2::Compression {
        match self {
            Level::None => flate2::Compression::none(),
            Level::Fast => flate2::Compression::fast(),
            Level::Normal => flate2::Compression::new(6),
            Level::Best => flate2::Compression::best(),
        }
    }

    /// The level as a bzip2 block size (1-9, in units of 100 kB).
    ///
    /// bzip2 can't store data uncompressed, so `None` gets the smallest blocks.
    pub fn bzip2(self) -> ::bzip2::Compression {
        match self {
            Level::None | Level::Fast => ::bzip2::Compression::new(1),
            Level::Normal => ::bzip2::Compression::new(6),
            Level::Best => ::bzip2::Compression::new(9),
        }
    }
}

impl FromStr for Level {
    type Err = StreamError;

    fn from_str(s: &str) -> StreamResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Level::None),
            "fast" => Ok(Level::Fast),
            "normal" | "default" => Ok(Level::Normal),
            "best" => Ok(Level::Best),
            _ => Err(StreamError::InvalidLevel(s.to_owned())),
        }
    }
}

/// Where a codec session is in its lifecycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, but no data has gone through the engine yet.
    Init,
    /// Data has gone through the engine.
    Running,
    /// The stream ended naturally and the engine is released.
    Finished,
    /// The session was closed or failed, and the engine is released.
    Closed,
}

/// One engine, owned exclusively by one adapter.
///
/// Holding the engine in an `Option` means releasing it is `take()`:
/// it can only happen once no matter how many paths try.
#[derive(Debug)]
pub(crate) struct Session<E> {
    engine: Option<E>,
    state: SessionState,
    kind: Engine,
}

impl<E> Session<E> {
    pub fn new(engine: E, kind: Engine) -> Self {
        Self {
            engine: Some(engine),
            state: SessionState::Init,
            kind,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn kind(&self) -> Engine {
        self.kind
    }

    /// Gets the engine for another step, failing if it's been released.
    pub fn engine(&mut self) -> StreamResult<&mut E> {
        self.engine.as_mut().ok_or(StreamError::StreamClosed)
    }

    /// Swaps in a fresh engine before any data has gone through the old one.
    pub fn replace(&mut self, engine: E) {
        debug_assert_eq!(self.state, SessionState::Init);
        self.engine = Some(engine);
    }

    pub fn running(&mut self) {
        if self.state == SessionState::Init {
            self.state = SessionState::Running;
        }
    }

    /// Releases the engine after a natural end of stream.
    pub fn finish(&mut self) {
        if self.release() {
            self.state = SessionState::Finished;
        }
    }

    /// Releases the engine for good. Idempotent.
    pub fn close(&mut self) {
        self.release();
        self.state = SessionState::Closed;
    }

    /// Closes the session after an error, unless it already ended.
    pub fn abort(&mut self) {
        if self.engine.is_some() {
            self.close();
        }
    }

    /// Builds the error for a fatal engine status, closing the session.
    pub fn fault(&mut self, code: FaultCode) -> StreamError {
        self.close();
        StreamError::EngineFault {
            engine: self.kind,
            code,
        }
    }

    fn release(&mut self) -> bool {
        let released = self.engine.take().is_some();
        if released {
            debug!("Released {} engine ({:?})", self.kind, self.state);
        }
        released
    }
}
