//! Shared backing storage for values that borrow rather than copy.

use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::error::Error;

/// A reference-counted, immutable byte buffer.
///
/// A [`Buffer`] backs no-copy strings produced by the DOM builder: the
/// string header borrows a pointer into the buffer and keeps a clone of the
/// buffer alive for the string's lifetime, so the bytes are owned for
/// exactly as long as any value needs them.
#[derive(Clone)]
pub struct Buffer(Arc<[u8]>);

impl Buffer {
    /// Wraps a byte sequence in a shared buffer.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Buffer(bytes.into())
    }

    /// Reads an entire file into a shared buffer.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Buffer(std::fs::read(path)?.into()))
    }

    /// Borrows the underlying bytes.
    ///
    /// The returned slice lives at a stable address for as long as any
    /// clone of this buffer exists.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(other: Vec<u8>) -> Self {
        Buffer(other.into())
    }
}

impl From<String> for Buffer {
    fn from(other: String) -> Self {
        Buffer(other.into_bytes().into())
    }
}

impl From<&str> for Buffer {
    fn from(other: &str) -> Self {
        Buffer(other.as_bytes().into())
    }
}

impl From<&[u8]> for Buffer {
    fn from(other: &[u8]) -> Self {
        Buffer(other.into())
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len()).finish()
    }
}
