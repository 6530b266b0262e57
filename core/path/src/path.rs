//! I/O-capable paths.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::glob::Glob;
use crate::stream::{ObjectReader, ObjectWriter};
use unipath_common::{Error, Flavor, PathSpec, Result, Scheme};
use unipath_storage::{Accessor, AccessorRegistry, Metadata};

/// Whether a path may touch storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Syntax only.
    Pure,
    /// Syntax plus storage I/O.
    Io,
}

/// Common view over pure and I/O-capable paths.
pub trait PathLike {
    /// Underlying syntactic path.
    fn spec(&self) -> &PathSpec;

    /// What the path can do.
    fn capability(&self) -> Capability;

    fn scheme(&self) -> Scheme {
        self.spec().scheme()
    }

    fn flavor(&self) -> Flavor {
        self.spec().flavor()
    }
}

impl PathLike for PathSpec {
    fn spec(&self) -> &PathSpec {
        self
    }

    fn capability(&self) -> Capability {
        Capability::Pure
    }
}

/// Where [`UniPath::download_file`] writes.
///
/// Exactly one of `output_file` and `output_dir` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadTarget {
    pub output_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// File name inside `output_dir`; defaults to the source name.
    pub filename: Option<String>,
}

impl DownloadTarget {
    /// Download to this exact file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            output_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Download into this directory.
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(path.into()),
            ..Self::default()
        }
    }

    /// Override the file name used with [`DownloadTarget::dir`].
    pub fn filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    fn resolve(&self, source: &PathSpec) -> Result<PathBuf> {
        match (&self.output_file, &self.output_dir) {
            (Some(_), Some(_)) => Err(Error::InvalidArgument(
                "output_file and output_dir are mutually exclusive".into(),
            )),
            (None, None) => Err(Error::InvalidArgument(
                "one of output_file or output_dir is required".into(),
            )),
            (Some(file), None) => Ok(file.clone()),
            (None, Some(dir)) => {
                let name = match &self.filename {
                    Some(name) => name.as_str(),
                    None => source.name().ok_or_else(|| {
                        Error::InvalidArgument(format!("{} has no file name", source))
                    })?,
                };
                Ok(dir.join(name))
            }
        }
    }
}

/// A path on local or remote storage that can perform I/O.
///
/// Every I/O call resolves the scheme's accessor through the registry at call
/// time, so a reconfigured scheme is picked up by paths created earlier.
#[derive(Clone)]
pub struct UniPath {
    spec: PathSpec,
    registry: Arc<AccessorRegistry>,
}

impl UniPath {
    /// Parse a path or URI against the global registry.
    ///
    /// # Errors
    /// - `InvalidArgument` for an unknown URI scheme
    pub fn new(text: &str) -> Result<Self> {
        Self::from_spec(PathSpec::parse(text)?)
    }

    /// Parse with an explicit flavor.
    ///
    /// # Errors
    /// - `UnsupportedPlatform` if `flavor` is not the host flavor
    pub fn with_flavor(text: &str, flavor: Flavor) -> Result<Self> {
        Self::from_spec(PathSpec::parse_with_flavor(text, flavor)?)
    }

    /// Wrap a pure path, using the global registry.
    pub fn from_spec(spec: PathSpec) -> Result<Self> {
        Self::with_registry(spec, AccessorRegistry::global())
    }

    /// Wrap a pure path, resolving accessors through `registry`.
    ///
    /// # Errors
    /// - `UnsupportedPlatform` if the path flavor cannot do I/O on this host
    pub fn with_registry(spec: PathSpec, registry: Arc<AccessorRegistry>) -> Result<Self> {
        if !spec.flavor().is_supported() {
            return Err(Error::UnsupportedPlatform(format!(
                "cannot instantiate {} path {} on this host",
                spec.flavor(),
                spec
            )));
        }
        Ok(Self { spec, registry })
    }

    /// Build `<scheme>://<key>` (or a local path) with an optional flavor.
    pub fn for_scheme(scheme: Scheme, key: &str, flavor: Option<Flavor>) -> Result<Self> {
        let text = match scheme {
            Scheme::Local => key.to_string(),
            remote => format!("{}://{}", remote.prefix(), key),
        };
        Self::with_flavor(&text, flavor.unwrap_or_else(Flavor::host))
    }

    /// Local path from a native path, using the global registry.
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            spec: PathSpec::from_std_path(path.as_ref()),
            registry: AccessorRegistry::global(),
        }
    }

    /// Local path sharing this path's registry.
    pub fn local_path(&self, path: impl AsRef<Path>) -> Self {
        self.derive(PathSpec::from_std_path(path.as_ref()))
    }

    pub(crate) fn derive(&self, spec: PathSpec) -> Self {
        Self {
            spec,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Registry used for accessor lookup.
    pub fn registry(&self) -> &Arc<AccessorRegistry> {
        &self.registry
    }

    /// Drop the I/O capability.
    pub fn into_spec(self) -> PathSpec {
        self.spec
    }

    // Pure algebra, delegated to the pure path.

    /// Storage scheme.
    pub fn scheme(&self) -> Scheme {
        self.spec.scheme()
    }

    /// Separator convention.
    pub fn flavor(&self) -> Flavor {
        self.spec.flavor()
    }

    /// Final component.
    pub fn name(&self) -> Option<&str> {
        self.spec.name()
    }

    /// Extension of the final component, dot included.
    pub fn suffix(&self) -> Option<&str> {
        self.spec.suffix()
    }

    /// Final component without its suffix.
    pub fn stem(&self) -> Option<&str> {
        self.spec.stem()
    }

    /// Logical parent; the anchor is its own parent.
    pub fn parent(&self) -> Self {
        self.derive(self.spec.parent())
    }

    /// Append a fragment; an absolute fragment replaces the path.
    pub fn join(&self, fragment: &str) -> Self {
        self.derive(self.spec.join(fragment))
    }

    /// Replace the final component.
    pub fn with_name(&self, name: &str) -> Result<Self> {
        Ok(self.derive(self.spec.with_name(name)?))
    }

    /// Replace the suffix of the final component.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self> {
        Ok(self.derive(self.spec.with_suffix(suffix)?))
    }

    /// Path of `self` relative to `base`.
    pub fn relative_to(&self, base: &UniPath) -> Result<PathSpec> {
        self.spec.relative_to(&base.spec)
    }

    /// Whether the path carries an anchor.
    pub fn is_absolute(&self) -> bool {
        self.spec.is_absolute()
    }

    /// Bucket of a remote path.
    pub fn bucket(&self) -> Option<&str> {
        self.spec.bucket()
    }

    /// Object key inside the bucket.
    pub fn key(&self) -> String {
        self.spec.key()
    }

    /// Rendering with forward slashes.
    pub fn as_posix(&self) -> String {
        self.spec.as_posix()
    }

    /// Native path for local paths.
    pub fn to_std_path(&self) -> Option<PathBuf> {
        self.spec.to_std_path()
    }

    // I/O

    /// Accessor for this path's scheme, looked up on every call.
    pub fn accessor(&self) -> Result<Arc<dyn Accessor>> {
        self.registry.get_or_create(self.spec.scheme())
    }

    /// Get metadata.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at this path
    pub fn stat(&self) -> Result<Metadata> {
        self.accessor()?.stat(&self.spec)
    }

    pub fn exists(&self) -> Result<bool> {
        self.accessor()?.exists(&self.spec)
    }

    pub fn is_dir(&self) -> Result<bool> {
        match self.stat() {
            Ok(meta) => Ok(meta.is_directory),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_file(&self) -> Result<bool> {
        match self.stat() {
            Ok(meta) => Ok(!meta.is_directory),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size in bytes of a file.
    pub fn size(&self) -> Result<u64> {
        self.stat()?
            .size
            .ok_or_else(|| Error::InvalidArgument(format!("{} is a directory", self)))
    }

    /// Direct children of this directory.
    pub fn iterdir(&self) -> Result<Vec<UniPath>> {
        Ok(self
            .accessor()?
            .list(&self.spec)?
            .into_iter()
            .map(|meta| self.derive(meta.path))
            .collect())
    }

    /// Paths below this one matching `pattern`. Lazy and restartable.
    pub fn glob(&self, pattern: &str) -> Glob {
        Glob::new(self.clone(), pattern)
    }

    /// Recursive glob: `pattern` matched at any depth.
    pub fn rglob(&self, pattern: &str) -> Glob {
        Glob::new(self.clone(), &format!("**/{}", pattern))
    }

    /// Open for reading.
    pub fn open_read(&self) -> Result<ObjectReader> {
        let inner = self.accessor()?.open_read(&self.spec)?;
        Ok(ObjectReader::new(self.spec.clone(), inner))
    }

    /// Open for writing; the object is replaced when the writer closes.
    pub fn open_write(&self) -> Result<ObjectWriter> {
        let inner = self.accessor()?.open_write(&self.spec)?;
        Ok(ObjectWriter::new(self.spec.clone(), inner))
    }

    /// Run `f` with a reader that is released afterwards.
    pub fn with_reader<T>(&self, f: impl FnOnce(&mut ObjectReader) -> Result<T>) -> Result<T> {
        let mut reader = self.open_read()?;
        f(&mut reader)
    }

    /// Run `f` with a writer. The object is committed if `f` succeeds and
    /// discarded if it fails.
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut ObjectWriter) -> Result<T>) -> Result<T> {
        let mut writer = self.open_write()?;
        match f(&mut writer) {
            Ok(value) => {
                writer.close()?;
                Ok(value)
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        self.with_reader(|reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            Ok(data)
        })
    }

    pub fn read_text(&self) -> Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| Error::InvalidArgument(format!("{} is not valid UTF-8: {}", self, e)))
    }

    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.with_writer(|writer| Ok(writer.write_all(data)?))
    }

    pub fn write_text(&self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())
    }

    /// Create an empty file if nothing exists here.
    ///
    /// # Errors
    /// - `AlreadyExists` if the path exists and `exist_ok` is false
    pub fn touch(&self, exist_ok: bool) -> Result<()> {
        if self.exists()? {
            return if exist_ok {
                Ok(())
            } else {
                Err(Error::AlreadyExists(self.to_string()))
            };
        }
        self.write_bytes(&[])
    }

    /// Copy this file to `dest`, possibly on another scheme.
    ///
    /// # Errors
    /// - `AlreadyExists` if `dest` exists and `overwrite` is false
    pub fn copy_to(&self, dest: &UniPath, overwrite: bool) -> Result<UniPath> {
        if !overwrite && dest.exists()? {
            return Err(Error::AlreadyExists(dest.to_string()));
        }
        if self.scheme() == dest.scheme() {
            self.accessor()?.copy(&self.spec, &dest.spec)?;
        } else {
            self.stream_to(dest)?;
        }
        debug!(from = %self, to = %dest, "Copied");
        Ok(dest.clone())
    }

    fn stream_to(&self, dest: &UniPath) -> Result<()> {
        let chunk = self.registry.settings()?.read_chunk_size.max(1);
        let mut reader = self.open_read()?;
        dest.with_writer(|writer| {
            let mut buf = vec![0u8; chunk];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                writer.write_all(&buf[..n])?;
            }
        })
    }

    /// Move this path to `dest`.
    ///
    /// Within a scheme this is the accessor's rename. Across schemes the data
    /// is copied and the source removed afterwards.
    ///
    /// # Errors
    /// - `AlreadyExists` if `dest` exists and `overwrite` is false
    /// - `DanglingSource` if the copy succeeded but the source could not be removed
    pub fn move_to(&self, dest: &UniPath, overwrite: bool) -> Result<UniPath> {
        if self.scheme() == dest.scheme() {
            if !overwrite && dest.exists()? {
                return Err(Error::AlreadyExists(dest.to_string()));
            }
            self.accessor()?.rename(&self.spec, &dest.spec)?;
            return Ok(dest.clone());
        }

        self.copy_to(dest, overwrite)?;
        self.remove().map_err(|e| Error::DanglingSource {
            origin: self.to_string(),
            destination: dest.to_string(),
            reason: e.to_string(),
        })?;
        Ok(dest.clone())
    }

    /// Delete this file.
    pub fn remove(&self) -> Result<()> {
        self.accessor()?.remove(&self.spec)
    }

    /// Delete this directory.
    pub fn rmdir(&self, recursive: bool) -> Result<()> {
        self.accessor()?.remove_dir(&self.spec, recursive)
    }

    /// Create this directory.
    pub fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()> {
        self.accessor()?.mkdir(&self.spec, parents, exist_ok)
    }

    /// Upload a local file next to this path.
    ///
    /// The destination is `self.parent()/<dest_name>`, where `dest_name`
    /// defaults to this path's own name.
    ///
    /// # Errors
    /// - `NotFound` if `source` is not a file
    /// - `AlreadyExists` if the destination exists and `overwrite` is false;
    ///   nothing is transferred in that case
    pub fn upload_file(&self, source: &Path, dest_name: Option<&str>, overwrite: bool) -> Result<UniPath> {
        if !source.is_file() {
            return Err(Error::NotFound(source.display().to_string()));
        }
        let name = match dest_name {
            Some(name) => name,
            None => self
                .name()
                .ok_or_else(|| Error::InvalidArgument(format!("{} has no name", self)))?,
        };
        let dest = self.parent().join(name);
        if !overwrite && dest.exists()? {
            return Err(Error::AlreadyExists(dest.to_string()));
        }
        let bytes = dest.accessor()?.put_file(source, &dest.spec, &|_: u64| {})?;
        debug!(source = %source.display(), dest = %dest, bytes, "Uploaded file");
        Ok(dest)
    }

    /// Download this object to a local file.
    ///
    /// # Errors
    /// - `InvalidArgument` unless exactly one of `output_file`/`output_dir` is set;
    ///   checked before any backend call
    /// - `AlreadyExists` if the local file exists and `overwrite` is false
    pub fn download_file(&self, target: &DownloadTarget, overwrite: bool) -> Result<UniPath> {
        let output = target.resolve(&self.spec)?;
        if !overwrite && output.exists() {
            return Err(Error::AlreadyExists(output.display().to_string()));
        }
        let bytes = self.accessor()?.get_file(&self.spec, &output, &|_: u64| {})?;
        debug!(source = %self, dest = %output.display(), bytes, "Downloaded file");
        Ok(self.local_path(output))
    }
}

impl PathLike for UniPath {
    fn spec(&self) -> &PathSpec {
        &self.spec
    }

    fn capability(&self) -> Capability {
        Capability::Io
    }
}

impl PartialEq for UniPath {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl Eq for UniPath {}

impl Hash for UniPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.spec.hash(state);
    }
}

impl fmt::Display for UniPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.spec, f)
    }
}

impl fmt::Debug for UniPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniPath({})", self.spec)
    }
}

impl AsRef<PathSpec> for UniPath {
    fn as_ref(&self) -> &PathSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use unipath_storage::{accessor_factory, BundleUpdate, MemoryAccessor, Settings};

    fn registry() -> Arc<AccessorRegistry> {
        Arc::new(AccessorRegistry::with_default_factories(Settings::default()))
    }

    fn mem(registry: &Arc<AccessorRegistry>, key: &str) -> UniPath {
        let spec = PathSpec::parse(&format!("mem://bucket/{}", key)).unwrap();
        UniPath::with_registry(spec, Arc::clone(registry)).unwrap()
    }

    #[test]
    fn test_capability_markers() {
        let spec = PathSpec::parse("mem://bucket/a").unwrap();
        assert_eq!(spec.capability(), Capability::Pure);
        let path = UniPath::with_registry(spec, registry()).unwrap();
        assert_eq!(path.capability(), Capability::Io);
        assert_eq!(PathLike::scheme(&path), Scheme::Memory);
    }

    #[test]
    fn test_foreign_flavor_fails_at_construction() {
        let foreign = match Flavor::host() {
            Flavor::Posix => Flavor::Windows,
            Flavor::Windows => Flavor::Posix,
        };
        let spec = PathSpec::parse_with_flavor("s3://bucket/key", foreign).unwrap();
        assert_eq!(spec.name(), Some("key"));

        let err = UniPath::with_registry(spec, registry()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_parent_join_round_trip() {
        let registry = registry();
        let path = mem(&registry, "dir/file.txt");
        let name = path.name().unwrap().to_string();
        assert_eq!(path.parent().join(&name), path);
    }

    #[test]
    fn test_read_write_text() {
        let registry = registry();
        let path = mem(&registry, "notes/hello.txt");
        path.write_text("hello").unwrap();

        assert_eq!(path.read_text().unwrap(), "hello");
        assert!(path.is_file().unwrap());
        assert!(path.parent().is_dir().unwrap());
        assert_eq!(path.size().unwrap(), 5);
    }

    #[test]
    fn test_missing_path_reports_not_found() {
        let registry = registry();
        let path = mem(&registry, "missing");
        assert!(!path.exists().unwrap());
        assert!(!path.is_file().unwrap());
        assert!(path.stat().unwrap_err().is_not_found());
    }

    #[test]
    fn test_with_writer_aborts_on_error() {
        let registry = registry();
        let path = mem(&registry, "partial.bin");
        let result: Result<()> = path.with_writer(|w| {
            w.write_all(b"half")?;
            Err(Error::InvalidArgument("stop".into()))
        });
        assert!(result.is_err());
        assert!(!path.exists().unwrap());
    }

    #[test]
    fn test_local_with_writer_abort_keeps_old_content() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        let path = mem(&registry, "unused").local_path(temp.path().join("report.txt"));
        path.write_text("original").unwrap();

        let result: Result<()> = path.with_writer(|w| {
            w.write_all(b"half")?;
            Err(Error::InvalidArgument("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(path.read_text().unwrap(), "original");
        assert_eq!(path.parent().iterdir().unwrap().len(), 1);
    }

    #[test]
    fn test_touch() {
        let registry = registry();
        let path = mem(&registry, "empty");
        path.touch(false).unwrap();
        assert_eq!(path.size().unwrap(), 0);
        path.touch(true).unwrap();
        assert!(matches!(path.touch(false), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_iterdir() {
        let registry = registry();
        mem(&registry, "d/a").write_text("1").unwrap();
        mem(&registry, "d/b").write_text("2").unwrap();
        mem(&registry, "d/sub/c").write_text("3").unwrap();

        let mut names: Vec<String> = mem(&registry, "d")
            .iterdir()
            .unwrap()
            .iter()
            .map(|p| p.name().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "sub"]);
    }

    #[test]
    fn test_copy_across_schemes() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        let remote = mem(&registry, "copied.txt");
        remote.write_text("payload").unwrap();

        let local = remote.local_path(temp.path().join("copied.txt"));
        remote.copy_to(&local, false).unwrap();
        assert_eq!(std::fs::read_to_string(temp.path().join("copied.txt")).unwrap(), "payload");

        assert!(matches!(remote.copy_to(&local, false), Err(Error::AlreadyExists(_))));
        remote.write_text("newer").unwrap();
        remote.copy_to(&local, true).unwrap();
        assert_eq!(local.read_text().unwrap(), "newer");
    }

    #[test]
    fn test_move_across_schemes_removes_source() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        let source = PathSpec::from_std_path(&temp.path().join("src.txt"));
        let local = UniPath::with_registry(source, Arc::clone(&registry)).unwrap();
        local.write_text("data").unwrap();

        let remote = mem(&registry, "moved.txt");
        local.move_to(&remote, false).unwrap();

        assert!(!temp.path().join("src.txt").exists());
        assert_eq!(remote.read_text().unwrap(), "data");
    }

    #[test]
    fn test_move_within_scheme() {
        let registry = registry();
        let from = mem(&registry, "a.txt");
        let to = mem(&registry, "b.txt");
        from.write_text("x").unwrap();
        from.move_to(&to, false).unwrap();
        assert!(!from.exists().unwrap());
        assert_eq!(to.read_text().unwrap(), "x");
    }

    #[test]
    fn test_upload_file_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("report.csv");
        std::fs::write(&source, "new").unwrap();

        let registry = registry();
        let dest = mem(&registry, "reports/report.csv");
        dest.write_text("old").unwrap();

        let err = dest.upload_file(&source, None, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(dest.read_text().unwrap(), "old");

        let written = dest.upload_file(&source, None, true).unwrap();
        assert_eq!(written, dest);
        assert_eq!(dest.read_text().unwrap(), "new");
    }

    #[test]
    fn test_upload_file_with_dest_name() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("local.txt");
        std::fs::write(&source, "abc").unwrap();

        let registry = registry();
        let written = mem(&registry, "in/placeholder")
            .upload_file(&source, Some("renamed.txt"), false)
            .unwrap();
        assert_eq!(written.key(), "in/renamed.txt");
        assert_eq!(written.read_text().unwrap(), "abc");
    }

    #[test]
    fn test_download_requires_one_target() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut registry = AccessorRegistry::new(Settings::default());
        let counter = Arc::clone(&built);
        registry
            .register(
                Scheme::Memory,
                accessor_factory(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(MemoryAccessor::new()))
                }),
            )
            .unwrap();
        let path = UniPath::with_registry(
            PathSpec::parse("mem://bucket/file").unwrap(),
            Arc::new(registry),
        )
        .unwrap();

        let err = path.download_file(&DownloadTarget::default(), false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let both = DownloadTarget {
            output_file: Some("/tmp/a".into()),
            output_dir: Some("/tmp".into()),
            filename: None,
        };
        assert!(matches!(path.download_file(&both, false), Err(Error::InvalidArgument(_))));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_download_file_to_dir() {
        let temp = TempDir::new().unwrap();
        let registry = registry();
        let remote = mem(&registry, "data/blob.bin");
        remote.write_bytes(&[1, 2, 3]).unwrap();

        let local = remote
            .download_file(&DownloadTarget::dir(temp.path()), false)
            .unwrap();
        assert_eq!(local.scheme(), Scheme::Local);
        assert_eq!(std::fs::read(temp.path().join("blob.bin")).unwrap(), vec![1, 2, 3]);

        let renamed = remote
            .download_file(&DownloadTarget::dir(temp.path()).filename("copy.bin"), false)
            .unwrap();
        assert_eq!(renamed.name(), Some("copy.bin"));

        let err = remote
            .download_file(&DownloadTarget::file(temp.path().join("blob.bin")), false)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_paths_see_reconfigured_accessor() {
        let registry = registry();
        let path = mem(&registry, "kept.txt");
        path.write_text("x").unwrap();
        let first = path.accessor().unwrap();
        assert!(Arc::ptr_eq(&first, &path.accessor().unwrap()));

        let changed = registry
            .update(Scheme::Memory, &BundleUpdate::new().region("elsewhere"))
            .unwrap();
        assert!(changed);

        // A fresh in-memory store replaces the old one.
        assert!(!Arc::ptr_eq(&first, &path.accessor().unwrap()));
        assert!(!path.exists().unwrap());
    }

    #[test]
    fn test_local_mkdir_and_rmdir() {
        let temp = TempDir::new().unwrap();
        let dir = UniPath::local(temp.path().join("a/b"));
        dir.mkdir(true, false).unwrap();
        assert!(dir.is_dir().unwrap());
        dir.join("f").write_text("1").unwrap();

        let top = dir.parent();
        assert!(top.rmdir(false).is_err());
        top.rmdir(true).unwrap();
        assert!(!top.exists().unwrap());
    }
}
