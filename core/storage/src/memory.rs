//! In-memory object store accessor for testing.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::accessor::{check_path, ensure_parent, Accessor, Metadata, Progress, ReadStream, WriteStream};
use unipath_common::{Error, PathSpec, Result, Scheme};

/// In-memory storage entry.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, metadata: Metadata },
    Directory { metadata: Metadata },
}

type Store = BTreeMap<String, Entry>;

/// In-memory object store served under `mem://`.
///
/// Keys are flat (`bucket/dir/object`) and directories are implicit: any key
/// prefix followed by `/` behaves as a directory, and `mkdir` leaves an
/// explicit marker. All data is lost on drop.
#[derive(Default)]
pub struct MemoryAccessor {
    storage: Arc<RwLock<Store>>,
}

impl MemoryAccessor {
    /// Create a new empty memory accessor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects (directory markers excluded).
    pub fn object_count(&self) -> usize {
        self.storage
            .read()
            .map(|s| s.values().filter(|e| matches!(e, Entry::File { .. })).count())
            .unwrap_or(0)
    }

    fn path_to_key(path: &PathSpec) -> Result<String> {
        check_path(Scheme::Memory, path)?;
        Ok(path.segments().join("/"))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.storage
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        write_store(&self.storage)
    }
}

fn write_store(storage: &RwLock<Store>) -> Result<RwLockWriteGuard<'_, Store>> {
    storage
        .write()
        .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
}

fn child_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// Keys strictly below `key`.
fn descendants<'a>(store: &'a Store, key: &str) -> impl Iterator<Item = (&'a String, &'a Entry)> {
    let prefix = child_prefix(key);
    store
        .range(prefix.clone()..)
        .take_while(move |(k, _)| k.starts_with(&prefix))
}

fn stat_in(store: &Store, path: &PathSpec, key: &str) -> Result<Metadata> {
    if key.is_empty() {
        return Ok(Metadata::directory(path.clone()));
    }
    match store.get(key) {
        Some(Entry::File { metadata, .. }) | Some(Entry::Directory { metadata }) => Ok(metadata.clone()),
        None if descendants(store, key).next().is_some() => Ok(Metadata::directory(path.clone())),
        None => Err(Error::NotFound(path.to_string())),
    }
}

fn file_entry(path: &PathSpec, data: Vec<u8>) -> Entry {
    let metadata = Metadata::file(path.clone(), data.len() as u64)
        .with_modified(Some(Utc::now()))
        .with_etag(Some(Uuid::new_v4().to_string()));
    Entry::File { data, metadata }
}

fn dir_entry(path: &PathSpec) -> Entry {
    Entry::Directory {
        metadata: Metadata::directory(path.clone()).with_modified(Some(Utc::now())),
    }
}

fn check_writable(store: &Store, path: &PathSpec, key: &str) -> Result<()> {
    if path.segments().len() < 2 {
        return Err(Error::InvalidArgument(format!(
            "{} names a bucket, not an object",
            path
        )));
    }
    match stat_in(store, path, key) {
        Ok(meta) if meta.is_directory => Err(Error::InvalidArgument(format!(
            "Cannot write directory: {}",
            path
        ))),
        _ => Ok(()),
    }
}

/// Buffers writes and stores the object on `finish`.
struct MemoryWriter {
    storage: Arc<RwLock<Store>>,
    path: PathSpec,
    key: String,
    buf: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl WriteStream for MemoryWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let MemoryWriter {
            storage,
            path,
            key,
            buf,
        } = *self;
        let mut store = write_store(&storage)?;
        store.insert(key, file_entry(&path, buf));
        Ok(())
    }
}

impl Accessor for MemoryAccessor {
    fn scheme(&self) -> Scheme {
        Scheme::Memory
    }

    fn stat(&self, path: &PathSpec) -> Result<Metadata> {
        let key = Self::path_to_key(path)?;
        stat_in(&*self.read()?, path, &key)
    }

    fn list(&self, path: &PathSpec) -> Result<Vec<Metadata>> {
        let key = Self::path_to_key(path)?;
        let store = self.read()?;
        if !stat_in(&store, path, &key)?.is_directory {
            return Err(Error::InvalidArgument(format!("Not a directory: {}", path)));
        }

        let prefix_len = child_prefix(&key).len();
        let mut children: BTreeMap<String, Metadata> = BTreeMap::new();
        for (k, entry) in descendants(&store, &key) {
            let rest = &k[prefix_len..];
            match rest.split_once('/') {
                Some((child, _)) => {
                    children
                        .entry(child.to_string())
                        .or_insert_with(|| Metadata::directory(path.join(child)));
                }
                None => {
                    let meta = match entry {
                        Entry::File { metadata, .. } | Entry::Directory { metadata } => metadata.clone(),
                    };
                    children.insert(rest.to_string(), meta);
                }
            }
        }
        Ok(children.into_values().collect())
    }

    fn open_read(&self, path: &PathSpec) -> Result<ReadStream> {
        let key = Self::path_to_key(path)?;
        let store = self.read()?;
        match store.get(&key) {
            Some(Entry::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            _ if stat_in(&store, path, &key).is_ok() => {
                Err(Error::InvalidArgument(format!("Cannot read directory: {}", path)))
            }
            _ => Err(Error::NotFound(path.to_string())),
        }
    }

    fn open_write(&self, path: &PathSpec) -> Result<Box<dyn WriteStream>> {
        let key = Self::path_to_key(path)?;
        check_writable(&*self.read()?, path, &key)?;
        Ok(Box::new(MemoryWriter {
            storage: Arc::clone(&self.storage),
            path: path.clone(),
            key,
            buf: Vec::new(),
        }))
    }

    fn copy(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let from_key = Self::path_to_key(from)?;
        let to_key = Self::path_to_key(to)?;
        let mut store = self.write()?;
        let data = match store.get(&from_key) {
            Some(Entry::File { data, .. }) => data.clone(),
            _ if stat_in(&store, from, &from_key).is_ok() => {
                return Err(Error::InvalidArgument(format!("Cannot copy directory: {}", from)));
            }
            _ => return Err(Error::NotFound(from.to_string())),
        };
        check_writable(&store, to, &to_key)?;
        store.insert(to_key, file_entry(to, data));
        Ok(())
    }

    fn rename(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let from_key = Self::path_to_key(from)?;
        let to_key = Self::path_to_key(to)?;
        let mut store = self.write()?;

        let meta = stat_in(&store, from, &from_key)?;
        if !meta.is_directory {
            check_writable(&store, to, &to_key)?;
            if let Some(Entry::File { data, .. }) = store.remove(&from_key) {
                store.insert(to_key, file_entry(to, data));
            }
            return Ok(());
        }

        let moved: Vec<String> = descendants(&store, &from_key).map(|(k, _)| k.clone()).collect();
        let prefix_len = child_prefix(&from_key).len();
        store.remove(&from_key);
        store.insert(to_key, dir_entry(to));
        for old_key in moved {
            let rest = old_key[prefix_len..].to_string();
            let new_path = to.join(&rest);
            let new_key = new_path.segments().join("/");
            let entry = match store.remove(&old_key) {
                Some(Entry::File { data, .. }) => file_entry(&new_path, data),
                Some(Entry::Directory { .. }) => dir_entry(&new_path),
                None => continue,
            };
            store.insert(new_key, entry);
        }
        Ok(())
    }

    fn remove(&self, path: &PathSpec) -> Result<()> {
        let key = Self::path_to_key(path)?;
        let mut store = self.write()?;
        match store.get(&key) {
            Some(Entry::File { .. }) => {
                store.remove(&key);
                Ok(())
            }
            _ if stat_in(&store, path, &key).is_ok() => {
                Err(Error::InvalidArgument(format!("Cannot delete directory: {}", path)))
            }
            _ => Err(Error::NotFound(path.to_string())),
        }
    }

    fn remove_dir(&self, path: &PathSpec, recursive: bool) -> Result<()> {
        let key = Self::path_to_key(path)?;
        let mut store = self.write()?;
        if !stat_in(&store, path, &key)?.is_directory {
            return Err(Error::InvalidArgument(format!("Not a directory: {}", path)));
        }
        let children: Vec<String> = descendants(&store, &key).map(|(k, _)| k.clone()).collect();
        if !children.is_empty() && !recursive {
            return Err(Error::InvalidArgument(format!("Directory not empty: {}", path)));
        }
        for child in children {
            store.remove(&child);
        }
        store.remove(&key);
        Ok(())
    }

    fn mkdir(&self, path: &PathSpec, parents: bool, exist_ok: bool) -> Result<()> {
        let key = Self::path_to_key(path)?;
        let mut store = self.write()?;
        match stat_in(&store, path, &key) {
            Ok(meta) if meta.is_directory && exist_ok => return Ok(()),
            Ok(_) => return Err(Error::AlreadyExists(path.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut missing = vec![path.clone()];
        for ancestor in path.ancestors() {
            let ancestor_key = ancestor.segments().join("/");
            match stat_in(&store, &ancestor, &ancestor_key) {
                Ok(meta) if meta.is_directory => break,
                Ok(_) => {
                    return Err(Error::AlreadyExists(format!("{} is a file", ancestor)));
                }
                Err(_) if parents => missing.push(ancestor),
                Err(_) => return Err(Error::NotFound(ancestor.to_string())),
            }
        }
        for dir in missing {
            store.insert(dir.segments().join("/"), dir_entry(&dir));
        }
        Ok(())
    }

    fn put_file(&self, source: &Path, dest: &PathSpec, progress: Progress<'_>) -> Result<u64> {
        let key = Self::path_to_key(dest)?;
        let data = fs::read(source).map_err(|e| Error::from_io(e, source.display()))?;
        let len = data.len() as u64;
        let mut store = self.write()?;
        check_writable(&store, dest, &key)?;
        store.insert(key, file_entry(dest, data));
        progress(len);
        Ok(len)
    }

    fn get_file(&self, source: &PathSpec, dest: &Path, progress: Progress<'_>) -> Result<u64> {
        let key = Self::path_to_key(source)?;
        let data = match self.read()?.get(&key) {
            Some(Entry::File { data, .. }) => data.clone(),
            Some(Entry::Directory { .. }) => {
                return Err(Error::InvalidArgument(format!("Cannot download directory: {}", source)));
            }
            None => return Err(Error::NotFound(source.to_string())),
        };
        ensure_parent(dest)?;
        fs::write(dest, &data).map_err(|e| Error::from_io(e, dest.display()))?;
        progress(data.len() as u64);
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn mem(text: &str) -> PathSpec {
        PathSpec::parse(text).unwrap()
    }

    fn put(accessor: &MemoryAccessor, path: &str, data: &[u8]) {
        let mut writer = accessor.open_write(&mem(path)).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
    }

    fn read_all(accessor: &MemoryAccessor, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        accessor.open_read(&mem(path)).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_write_and_read() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/test.txt", b"Hello, World!");
        assert_eq!(read_all(&accessor, "mem://bucket/test.txt"), b"Hello, World!");
        assert_eq!(accessor.object_count(), 1);
    }

    #[test]
    fn test_write_is_invisible_until_finish() {
        let accessor = MemoryAccessor::new();
        let mut writer = accessor.open_write(&mem("mem://bucket/pending")).unwrap();
        writer.write_all(b"partial").unwrap();
        assert!(!accessor.exists(&mem("mem://bucket/pending")).unwrap());
        writer.finish().unwrap();
        assert!(accessor.exists(&mem("mem://bucket/pending")).unwrap());
    }

    #[test]
    fn test_open_write_rejects_directories_and_buckets() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/dir/child.txt", b"x");
        assert!(accessor.stat(&mem("mem://bucket/dir")).unwrap().is_directory);

        for target in ["mem://bucket/dir", "mem://bucket"] {
            let result = accessor.open_write(&mem(target));
            assert!(matches!(result, Err(Error::InvalidArgument(_))), "{}", target);
        }
        assert!(accessor.open_write(&mem("mem://bucket/dir/other.txt")).is_ok());
    }

    #[test]
    fn test_implicit_directories() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/a/b/c.txt", b"c");
        put(&accessor, "mem://bucket/a/d.txt", b"d");

        assert!(accessor.stat(&mem("mem://bucket/a/b")).unwrap().is_directory);
        let names: Vec<String> = accessor
            .list(&mem("mem://bucket/a"))
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["b", "d.txt"]);

        let walked = accessor.walk(&mem("mem://bucket")).unwrap();
        assert_eq!(walked.len(), 4);
    }

    #[test]
    fn test_list_missing_and_file() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/file", b"x");
        assert!(matches!(accessor.list(&mem("mem://bucket/none")), Err(Error::NotFound(_))));
        assert!(matches!(accessor.list(&mem("mem://bucket/file")), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_mkdir_semantics() {
        let accessor = MemoryAccessor::new();
        assert!(matches!(
            accessor.mkdir(&mem("mem://bucket/x/y"), false, false),
            Err(Error::NotFound(_))
        ));
        accessor.mkdir(&mem("mem://bucket/x/y"), true, false).unwrap();
        assert!(accessor.stat(&mem("mem://bucket/x")).unwrap().is_directory);
        assert!(matches!(
            accessor.mkdir(&mem("mem://bucket/x/y"), false, false),
            Err(Error::AlreadyExists(_))
        ));
        accessor.mkdir(&mem("mem://bucket/x/y"), false, true).unwrap();
        assert_eq!(accessor.object_count(), 0);
    }

    #[test]
    fn test_copy_and_rename() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/src/a.txt", b"a");
        accessor.copy(&mem("mem://bucket/src/a.txt"), &mem("mem://bucket/b.txt")).unwrap();
        assert_eq!(read_all(&accessor, "mem://bucket/b.txt"), b"a");

        accessor.rename(&mem("mem://bucket/src"), &mem("mem://bucket/dst")).unwrap();
        assert!(!accessor.exists(&mem("mem://bucket/src/a.txt")).unwrap());
        assert_eq!(read_all(&accessor, "mem://bucket/dst/a.txt"), b"a");
        let moved = accessor.stat(&mem("mem://bucket/dst/a.txt")).unwrap();
        assert_eq!(moved.path, mem("mem://bucket/dst/a.txt"));
    }

    #[test]
    fn test_remove_semantics() {
        let accessor = MemoryAccessor::new();
        put(&accessor, "mem://bucket/d/f", b"f");

        assert!(matches!(accessor.remove(&mem("mem://bucket/d")), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            accessor.remove_dir(&mem("mem://bucket/d"), false),
            Err(Error::InvalidArgument(_))
        ));
        accessor.remove_dir(&mem("mem://bucket/d"), true).unwrap();
        assert!(!accessor.exists(&mem("mem://bucket/d")).unwrap());
        assert!(matches!(accessor.remove(&mem("mem://bucket/d/f")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_put_and_get_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let source = temp.path().join("in.bin");
        fs::write(&source, b"payload").unwrap();

        let accessor = MemoryAccessor::new();
        let remote = mem("mem://bucket/in.bin");
        assert_eq!(accessor.put_file(&source, &remote, &|_: u64| {}).unwrap(), 7);

        let dest = temp.path().join("out/in.bin");
        assert_eq!(accessor.get_file(&remote, &dest, &|_: u64| {}).unwrap(), 7);
        assert_eq!(fs::read(dest).unwrap(), b"payload");
    }

    #[test]
    fn test_bucket_is_not_writable() {
        let accessor = MemoryAccessor::new();
        assert!(matches!(accessor.open_write(&mem("mem://bucket")), Err(Error::InvalidArgument(_))));
    }
}
