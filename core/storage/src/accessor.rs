//! Storage accessor trait definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use unipath_common::{Error, PathSpec, Result, Scheme};

/// Chunk size used when an accessor streams a file without a native primitive.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata for a stored object or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Full location of the object.
    pub path: PathSpec,
    /// Name of the object.
    pub name: String,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Whether this is a directory (or a common key prefix).
    pub is_directory: bool,
    /// Last modification time, when the backend reports one.
    pub modified: Option<DateTime<Utc>>,
    /// ETag or revision ID.
    pub etag: Option<String>,
}

impl Metadata {
    /// Metadata for a file at `path`.
    pub fn file(path: PathSpec, size: u64) -> Self {
        Self {
            name: path.name().unwrap_or_default().to_string(),
            path,
            size: Some(size),
            is_directory: false,
            modified: None,
            etag: None,
        }
    }

    /// Metadata for a directory (or implicit prefix) at `path`.
    pub fn directory(path: PathSpec) -> Self {
        Self {
            name: path.name().unwrap_or_default().to_string(),
            path,
            size: None,
            is_directory: true,
            modified: None,
            etag: None,
        }
    }

    /// Set the modification time.
    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }

    /// Set the etag.
    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Readable byte stream returned by [`Accessor::open_read`].
pub type ReadStream = Box<dyn Read + Send>;

/// Writable byte stream returned by [`Accessor::open_write`].
///
/// Bytes become visible at the destination only once `finish` succeeds.
pub trait WriteStream: Write + Send {
    /// Flush buffered bytes and commit the object.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Progress callback receiving the number of bytes moved since the last call.
pub type Progress<'a> = &'a (dyn Fn(u64) + Sync);

/// Backend client for one storage scheme.
///
/// All operations are blocking. Async callers reach them through the
/// worker-pool bridge in the `unipath` crate. Implementations must be safe to
/// share between threads; the registry hands out one instance per scheme.
pub trait Accessor: Send + Sync {
    /// Scheme this accessor serves.
    fn scheme(&self) -> Scheme;

    /// Get metadata for a path.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    fn stat(&self, path: &PathSpec) -> Result<Metadata>;

    /// Check if a path exists.
    fn exists(&self, path: &PathSpec) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List the direct children of a directory.
    ///
    /// # Errors
    /// - `NotFound` if the directory does not exist
    /// - `InvalidArgument` if `path` is a file
    fn list(&self, path: &PathSpec) -> Result<Vec<Metadata>>;

    /// List every descendant of a directory, parents before children.
    fn walk(&self, path: &PathSpec) -> Result<Vec<Metadata>> {
        let mut out = Vec::new();
        let mut pending = VecDeque::from([path.clone()]);
        while let Some(dir) = pending.pop_front() {
            for entry in self.list(&dir)? {
                if entry.is_directory {
                    pending.push_back(entry.path.clone());
                }
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Open an object for reading.
    fn open_read(&self, path: &PathSpec) -> Result<ReadStream>;

    /// Open an object for writing, replacing any existing content on commit.
    fn open_write(&self, path: &PathSpec) -> Result<Box<dyn WriteStream>>;

    /// Copy a single object, replacing the destination.
    fn copy(&self, from: &PathSpec, to: &PathSpec) -> Result<()>;

    /// Move/rename a path within this scheme.
    fn rename(&self, from: &PathSpec, to: &PathSpec) -> Result<()>;

    /// Delete a file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `InvalidArgument` if `path` is a directory
    fn remove(&self, path: &PathSpec) -> Result<()>;

    /// Delete a directory.
    ///
    /// # Preconditions
    /// - Directory must be empty unless `recursive` is set
    fn remove_dir(&self, path: &PathSpec, recursive: bool) -> Result<()>;

    /// Create a directory.
    ///
    /// # Errors
    /// - `AlreadyExists` if `path` exists and `exist_ok` is false, or exists as a file
    /// - `NotFound` if the parent is missing and `parents` is false
    fn mkdir(&self, path: &PathSpec, parents: bool, exist_ok: bool) -> Result<()>;

    /// Upload a local file to `dest`, returning the bytes transferred.
    fn put_file(&self, source: &Path, dest: &PathSpec, progress: Progress<'_>) -> Result<u64> {
        let mut file = File::open(source).map_err(|e| Error::from_io(e, source.display()))?;
        let mut writer = self.open_write(dest)?;
        let total = pump(&mut file, &mut writer, progress)?;
        writer.finish()?;
        Ok(total)
    }

    /// Download `source` into a local file, returning the bytes transferred.
    fn get_file(&self, source: &PathSpec, dest: &Path, progress: Progress<'_>) -> Result<u64> {
        let mut reader = self.open_read(source)?;
        ensure_parent(dest)?;
        let mut file = File::create(dest).map_err(|e| Error::from_io(e, dest.display()))?;
        let total = pump(&mut reader, &mut file, progress)?;
        file.flush()?;
        Ok(total)
    }

    /// Number of transfers this backend should run at once.
    fn transfer_concurrency(&self) -> usize {
        4
    }

    /// Release backend resources. Called once when the registry drops the accessor.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Copy `reader` into `writer` chunk by chunk, reporting each chunk to `progress`.
pub fn pump<R, W>(reader: &mut R, writer: &mut W, progress: Progress<'_>) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
        progress(n as u64);
    }
    Ok(total)
}

/// Create the parent directory of a local destination file.
pub fn ensure_parent(dest: &Path) -> Result<()> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| Error::from_io(e, parent.display())),
        _ => Ok(()),
    }
}

/// Reject paths that belong to another scheme or carry no anchor.
pub fn check_path(scheme: Scheme, path: &PathSpec) -> Result<()> {
    if path.scheme() != scheme {
        return Err(Error::InvalidArgument(format!(
            "{} is not a {} path",
            path,
            scheme.provider()
        )));
    }
    if !path.is_absolute() {
        return Err(Error::InvalidArgument(format!(
            "{} is not an absolute path",
            path
        )));
    }
    Ok(())
}
