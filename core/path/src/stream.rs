//! Scoped read and write handles.

use std::fmt;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

use unipath_common::{PathSpec, Result};
use unipath_storage::{ReadStream, WriteStream};

/// Readable handle on an object. Released when dropped.
pub struct ObjectReader {
    path: PathSpec,
    inner: ReadStream,
}

impl ObjectReader {
    pub(crate) fn new(path: PathSpec, inner: ReadStream) -> Self {
        Self { path, inner }
    }

    /// Object being read.
    pub fn path(&self) -> &PathSpec {
        &self.path
    }

    /// Release the handle.
    pub fn close(self) {}
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader").field("path", &self.path).finish()
    }
}

/// Writable handle on an object.
///
/// The object is committed by [`ObjectWriter::close`]. A writer dropped
/// without `close` still commits, logging any error it cannot return;
/// [`ObjectWriter::abort`] discards the written bytes instead.
pub struct ObjectWriter {
    path: PathSpec,
    inner: Option<Box<dyn WriteStream>>,
}

impl ObjectWriter {
    pub(crate) fn new(path: PathSpec, inner: Box<dyn WriteStream>) -> Self {
        Self {
            path,
            inner: Some(inner),
        }
    }

    /// Object being written.
    pub fn path(&self) -> &PathSpec {
        &self.path
    }

    /// Commit the written bytes.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    /// Discard the written bytes without committing.
    pub fn abort(mut self) {
        if self.inner.take().is_some() {
            debug!(path = %self.path, "Write aborted");
        }
    }

    fn commit(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.finish(),
            None => Ok(()),
        }
    }

    fn stream(&mut self) -> io::Result<&mut Box<dyn WriteStream>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed"))
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            warn!(path = %self.path, error = %e, "Failed to commit object on drop");
        }
    }
}

impl fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWriter")
            .field("path", &self.path)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
