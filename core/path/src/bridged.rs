//! Async counterparts of the blocking `UniPath` operations.
//!
//! Each method clones the path, moves its arguments onto the global
//! [`Bridge`] and runs the blocking method there.

use std::path::PathBuf;

use crate::batch::{BatchReport, BatchSource, TransferOptions};
use crate::bridge::Bridge;
use crate::path::{DownloadTarget, UniPath};
use crate::stream::{ObjectReader, ObjectWriter};
use unipath_common::Result;
use unipath_storage::Metadata;

macro_rules! bridged {
    ($(
        $(#[$meta:meta])*
        $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty => |$path:ident| $call:expr;
    )*) => {
        impl UniPath {
            $(
                $(#[$meta])*
                pub async fn $name(&self, $($arg: $ty),*) -> Result<$ret> {
                    let $path = self.clone();
                    Bridge::global()?.run(move || $call).await
                }
            )*
        }
    };
}

bridged! {
    /// Async [`UniPath::stat`].
    async_stat() -> Metadata => |p| p.stat();
    async_exists() -> bool => |p| p.exists();
    async_is_dir() -> bool => |p| p.is_dir();
    async_is_file() -> bool => |p| p.is_file();
    async_size() -> u64 => |p| p.size();
    async_iterdir() -> Vec<UniPath> => |p| p.iterdir();
    /// Async glob, collected eagerly.
    async_glob(pattern: String) -> Vec<UniPath> => |p| p.glob(&pattern).paths();
    async_rglob(pattern: String) -> Vec<UniPath> => |p| p.rglob(&pattern).paths();
    async_open_read() -> ObjectReader => |p| p.open_read();
    async_open_write() -> ObjectWriter => |p| p.open_write();
    async_read_bytes() -> Vec<u8> => |p| p.read_bytes();
    async_read_text() -> String => |p| p.read_text();
    async_write_bytes(data: Vec<u8>) -> () => |p| p.write_bytes(&data);
    async_write_text(text: String) -> () => |p| p.write_text(&text);
    async_touch(exist_ok: bool) -> () => |p| p.touch(exist_ok);
    async_copy_to(dest: UniPath, overwrite: bool) -> UniPath => |p| p.copy_to(&dest, overwrite);
    async_move_to(dest: UniPath, overwrite: bool) -> UniPath => |p| p.move_to(&dest, overwrite);
    async_remove() -> () => |p| p.remove();
    async_rmdir(recursive: bool) -> () => |p| p.rmdir(recursive);
    async_mkdir(parents: bool, exist_ok: bool) -> () => |p| p.mkdir(parents, exist_ok);
    /// Async [`UniPath::upload_file`].
    async_upload_file(source: PathBuf, dest_name: Option<String>, overwrite: bool) -> UniPath
        => |p| p.upload_file(&source, dest_name.as_deref(), overwrite);
    async_download_file(target: DownloadTarget, overwrite: bool) -> UniPath
        => |p| p.download_file(&target, overwrite);
    async_batch_upload_files(source: BatchSource, options: TransferOptions) -> Vec<UniPath>
        => |p| p.batch_upload_files(&source, &options);
    async_batch_upload_report(source: BatchSource, options: TransferOptions) -> BatchReport
        => |p| p.batch_upload_report(&source, &options);
    async_batch_download_files(pattern: String, output_dir: PathBuf, options: TransferOptions) -> Vec<UniPath>
        => |p| p.batch_download_files(&pattern, &output_dir, &options);
    async_batch_download_report(pattern: String, output_dir: PathBuf, options: TransferOptions) -> BatchReport
        => |p| p.batch_download_report(&pattern, &output_dir, &options);
}

impl UniPath {
    /// Async [`UniPath::with_reader`]; `f` runs on a bridge worker.
    pub async fn async_with_reader<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ObjectReader) -> Result<T> + Send + 'static,
    {
        let path = self.clone();
        Bridge::global()?.run(move || path.with_reader(f)).await
    }

    /// Async [`UniPath::with_writer`]; `f` runs on a bridge worker.
    pub async fn async_with_writer<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ObjectWriter) -> Result<T> + Send + 'static,
    {
        let path = self.clone();
        Bridge::global()?.run(move || path.with_writer(f)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use tempfile::TempDir;
    use unipath_common::{Error, PathSpec};
    use unipath_storage::{AccessorRegistry, Settings};

    fn mem(key: &str) -> UniPath {
        let registry = Arc::new(AccessorRegistry::with_default_factories(Settings::default()));
        UniPath::with_registry(PathSpec::parse(&format!("mem://bucket/{}", key)).unwrap(), registry)
            .unwrap()
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let path = mem("async/file.txt");
        path.async_write_text("hello".to_string()).await.unwrap();

        assert!(path.async_exists().await.unwrap());
        assert!(path.async_is_file().await.unwrap());
        assert_eq!(path.async_read_text().await.unwrap(), "hello");
        assert_eq!(path.async_size().await.unwrap(), 5);
        assert_eq!(path.async_stat().await.unwrap().name, "file.txt");
    }

    #[tokio::test]
    async fn test_async_errors_match_sync() {
        let path = mem("missing");
        let err = path.async_read_bytes().await.unwrap_err();
        assert!(err.is_not_found());

        let err = path
            .async_download_file(DownloadTarget::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_async_scoped_streams() {
        let path = mem("scoped.bin");
        path.async_with_writer(|w| Ok(w.write_all(b"abc")?)).await.unwrap();
        let data = path
            .async_with_reader(|r| {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf)?;
                Ok(buf)
            })
            .await
            .unwrap();
        assert_eq!(data, b"abc");
    }

    #[tokio::test]
    async fn test_async_glob_and_batch() {
        let temp = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt"] {
            std::fs::write(temp.path().join(name), name).unwrap();
        }
        let dest = mem("batch");
        let uploaded = dest
            .async_batch_upload_files(
                BatchSource::glob(temp.path(), "*.txt"),
                TransferOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(uploaded.len(), 2);

        let found = dest.async_glob("*.txt".to_string()).await.unwrap();
        assert_eq!(found, uploaded);
    }

    #[tokio::test]
    async fn test_concurrent_async_calls() {
        let root = mem("many");
        let writes = (0..16).map(|i| {
            let path = root.join(&format!("{}.txt", i));
            async move { path.async_write_text(i.to_string()).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }
        assert_eq!(root.async_iterdir().await.unwrap().len(), 16);
    }
}
