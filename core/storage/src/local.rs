//! Local filesystem accessor.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::accessor::{check_path, ensure_parent, Accessor, Metadata, Progress, ReadStream, WriteStream};
use unipath_common::{Error, PathSpec, Result, Scheme};

/// Local filesystem accessor.
///
/// Paths map one to one onto the host filesystem. Only paths of the host
/// flavor are served.
#[derive(Debug, Default)]
pub struct LocalAccessor;

impl LocalAccessor {
    /// Create a new local accessor.
    pub fn new() -> Self {
        Self
    }

    /// Convert a PathSpec to a filesystem path.
    fn to_fs_path(&self, path: &PathSpec) -> Result<PathBuf> {
        check_path(Scheme::Local, path)?;
        if !path.flavor().is_supported() {
            return Err(Error::UnsupportedPlatform(format!(
                "cannot access {} path {} on this host",
                path.flavor(),
                path
            )));
        }
        path.to_std_path()
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a local path", path)))
    }

    /// Create metadata from filesystem metadata.
    fn create_metadata(&self, path: PathSpec, fs_meta: &fs::Metadata) -> Metadata {
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(|t| t.into());
        let etag = modified.map(|m| format!("{}-{}", m.timestamp(), fs_meta.len()));
        let meta = if fs_meta.is_dir() {
            Metadata::directory(path)
        } else {
            Metadata::file(path, fs_meta.len())
        };
        meta.with_modified(modified).with_etag(etag)
    }

    fn fs_metadata(&self, path: &Path) -> Result<fs::Metadata> {
        fs::metadata(path).map_err(|e| Error::from_io(e, path.display()))
    }
}

/// Writes into a sibling temporary file that replaces the destination on
/// `finish`. Dropped without `finish`, the temporary file is deleted and the
/// destination is left untouched.
struct LocalWriter {
    path: PathBuf,
    inner: BufWriter<NamedTempFile>,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl WriteStream for LocalWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let LocalWriter { path, inner } = *self;
        let temp = inner
            .into_inner()
            .map_err(|e| Error::from_io(e.into_error(), path.display()))?;
        temp.persist(&path)
            .map_err(|e| Error::from_io(e.error, path.display()))?;
        Ok(())
    }
}

impl Accessor for LocalAccessor {
    fn scheme(&self) -> Scheme {
        Scheme::Local
    }

    fn stat(&self, path: &PathSpec) -> Result<Metadata> {
        let fs_path = self.to_fs_path(path)?;
        let fs_meta = self.fs_metadata(&fs_path)?;
        Ok(self.create_metadata(path.clone(), &fs_meta))
    }

    fn list(&self, path: &PathSpec) -> Result<Vec<Metadata>> {
        let fs_path = self.to_fs_path(path)?;
        let fs_meta = self.fs_metadata(&fs_path)?;
        if !fs_meta.is_dir() {
            return Err(Error::InvalidArgument(format!("Not a directory: {}", path)));
        }

        let mut results = Vec::new();
        let entries = fs::read_dir(&fs_path).map_err(|e| Error::from_io(e, path))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Entry vanished between readdir and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::from_io(e, entry.path().display())),
            };
            results.push(self.create_metadata(path.join(&name), &meta));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn open_read(&self, path: &PathSpec) -> Result<ReadStream> {
        let fs_path = self.to_fs_path(path)?;
        if self.fs_metadata(&fs_path)?.is_dir() {
            return Err(Error::InvalidArgument(format!("Cannot read directory: {}", path)));
        }
        let file = File::open(&fs_path).map_err(|e| Error::from_io(e, path))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write(&self, path: &PathSpec) -> Result<Box<dyn WriteStream>> {
        let fs_path = self.to_fs_path(path)?;
        if fs_path.is_dir() {
            return Err(Error::InvalidArgument(format!("Cannot write directory: {}", path)));
        }
        let dir = match fs_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir).map_err(|e| Error::from_io(e, path))?;
        Ok(Box::new(LocalWriter {
            path: fs_path,
            inner: BufWriter::new(temp),
        }))
    }

    fn copy(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let from_path = self.to_fs_path(from)?;
        let to_path = self.to_fs_path(to)?;
        if self.fs_metadata(&from_path)?.is_dir() {
            return Err(Error::InvalidArgument(format!("Cannot copy directory: {}", from)));
        }
        fs::copy(&from_path, &to_path).map_err(|e| Error::from_io(e, to))?;
        Ok(())
    }

    fn rename(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let from_path = self.to_fs_path(from)?;
        let to_path = self.to_fs_path(to)?;
        fs::rename(&from_path, &to_path).map_err(|e| Error::from_io(e, from))
    }

    fn remove(&self, path: &PathSpec) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        if self.fs_metadata(&fs_path)?.is_dir() {
            return Err(Error::InvalidArgument(format!("Cannot delete directory: {}", path)));
        }
        fs::remove_file(&fs_path).map_err(|e| Error::from_io(e, path))
    }

    fn remove_dir(&self, path: &PathSpec, recursive: bool) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        if !self.fs_metadata(&fs_path)?.is_dir() {
            return Err(Error::InvalidArgument(format!("Not a directory: {}", path)));
        }
        if recursive {
            return fs::remove_dir_all(&fs_path).map_err(|e| Error::from_io(e, path));
        }
        let mut entries = fs::read_dir(&fs_path).map_err(|e| Error::from_io(e, path))?;
        if entries.next().is_some() {
            return Err(Error::InvalidArgument(format!("Directory not empty: {}", path)));
        }
        fs::remove_dir(&fs_path).map_err(|e| Error::from_io(e, path))
    }

    fn mkdir(&self, path: &PathSpec, parents: bool, exist_ok: bool) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        if let Ok(meta) = fs::metadata(&fs_path) {
            if meta.is_dir() && exist_ok {
                return Ok(());
            }
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let result = if parents {
            fs::create_dir_all(&fs_path)
        } else {
            fs::create_dir(&fs_path)
        };
        result.map_err(|e| Error::from_io(e, path))
    }

    fn put_file(&self, source: &Path, dest: &PathSpec, progress: Progress<'_>) -> Result<u64> {
        let dest_path = self.to_fs_path(dest)?;
        ensure_parent(&dest_path)?;
        let bytes = fs::copy(source, &dest_path).map_err(|e| Error::from_io(e, source.display()))?;
        progress(bytes);
        Ok(bytes)
    }

    fn get_file(&self, source: &PathSpec, dest: &Path, progress: Progress<'_>) -> Result<u64> {
        let source_path = self.to_fs_path(source)?;
        ensure_parent(dest)?;
        let bytes = fs::copy(&source_path, dest).map_err(|e| Error::from_io(e, source))?;
        progress(bytes);
        Ok(bytes)
    }

    fn transfer_concurrency(&self) -> usize {
        num_cpus::get().max(1)
    }
}
