use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use ::s3::bucket::Bucket;
use ::s3::creds::Credentials;
use ::s3::error::S3Error;
use ::s3::serde_types::Part;
use ::s3::Region;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::runtime::ObjectRuntime;
use crate::accessor::{check_path, ensure_parent, pump, Accessor, Metadata, Progress, ReadStream, WriteStream};
use crate::settings::CredentialBundle;
use unipath_common::{Error, PathSpec, Result, Scheme};

/// Objects at or above this size go through multipart upload.
const PART_SIZE: usize = 8 * 1024 * 1024;
const CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_CONCURRENCY: usize = 8;

/// Characters escaped in the `x-amz-copy-source` key.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Accessor for one S3-protocol scheme.
///
/// Holds a rust-s3 client per bucket and the runtime that drives it.
pub struct S3Accessor {
    scheme: Scheme,
    region: Region,
    credentials: Credentials,
    path_style: bool,
    concurrency: usize,
    runtime: Arc<ObjectRuntime>,
    buckets: RwLock<HashMap<String, Box<Bucket>>>,
}

impl S3Accessor {
    /// Create an accessor for `scheme` from `bundle`.
    ///
    /// # Errors
    /// - `BackendUnavailable` if no usable endpoint or credentials can be derived
    pub fn new(scheme: Scheme, bundle: &CredentialBundle) -> Result<Self> {
        if !scheme.is_s3_family() {
            return Err(Error::InvalidArgument(format!(
                "{} is not served by the S3 protocol",
                scheme
            )));
        }

        let region = bundle.region.clone().unwrap_or_else(|| match scheme {
            Scheme::R2 => "auto".to_string(),
            _ => "us-east-1".to_string(),
        });
        let endpoint = match (&bundle.endpoint, scheme) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Scheme::S3) => format!("https://s3.{}.amazonaws.com", region),
            (None, _) => return Err(Error::backend(scheme, "no endpoint configured")),
        };
        url::Url::parse(&endpoint)
            .map_err(|e| Error::backend(scheme, format!("invalid endpoint '{}': {}", endpoint, e)))?;

        let credentials = if bundle.has_credentials() {
            Credentials::new(
                bundle.access_key_id.as_deref(),
                bundle.secret_access_key.as_ref().map(|s| s.expose()),
                bundle.session_token.as_ref().map(|s| s.expose()),
                None,
                None,
            )
        } else {
            Credentials::anonymous()
        };
        let credentials = credentials
            .map_err(|e| Error::backend(scheme, format!("invalid credentials: {}", e)))?;

        let concurrency = match bundle.option("max_concurrency") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                Error::backend(scheme, format!("max_concurrency must be a number, got '{}'", raw))
            })?,
            None => DEFAULT_CONCURRENCY,
        };

        debug!(%scheme, %endpoint, %region, path_style = bundle.path_style, "Creating S3 accessor");

        Ok(Self {
            scheme,
            region: Region::Custom { region, endpoint },
            credentials,
            path_style: bundle.path_style,
            concurrency: concurrency.max(1),
            runtime: Arc::new(ObjectRuntime::new(scheme)?),
            buckets: RwLock::new(HashMap::new()),
        })
    }

    /// Client for `name`, built on first use.
    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        if let Some(bucket) = self.buckets.read().map_err(poisoned)?.get(name) {
            return Ok(bucket.clone());
        }
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| self.s3_error(e))?;
        let bucket = if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        self.buckets
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    /// Bucket client and key for `path`; `None` for the scheme root.
    fn locate(&self, path: &PathSpec) -> Result<Option<(Box<Bucket>, String)>> {
        check_path(self.scheme, path)?;
        match path.bucket() {
            Some(name) => Ok(Some((self.bucket(name)?, path.key()))),
            None => Ok(None),
        }
    }

    fn require(&self, path: &PathSpec) -> Result<(Box<Bucket>, String)> {
        self.locate(path)?
            .ok_or_else(|| Error::InvalidArgument(format!("{} does not name a bucket", path)))
    }

    fn require_object(&self, path: &PathSpec) -> Result<(Box<Bucket>, String)> {
        let (bucket, key) = self.require(path)?;
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!("{} names a bucket, not an object", path)));
        }
        Ok((bucket, key))
    }

    fn s3_error(&self, err: S3Error) -> Error {
        s3_error(self.scheme, err)
    }

    /// Every object key below `prefix`.
    fn keys_below(&self, bucket: &Bucket, prefix: &str) -> Result<Vec<String>> {
        let scheme = self.scheme;
        let results = self.runtime.block_on(|| async move {
            bucket
                .list(prefix.to_string(), None)
                .await
                .map_err(|e| s3_error(scheme, e))
        })?;
        Ok(results
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|obj| obj.key))
            .collect())
    }

    fn delete_key(&self, bucket: &Bucket, key: &str, path: &PathSpec) -> Result<()> {
        let scheme = self.scheme;
        let code = self.runtime.block_on(|| async move {
            bucket
                .delete_object(key)
                .await
                .map(|r| r.status_code())
                .map_err(|e| s3_error(scheme, e))
        })?;
        check_status(scheme, code, path)
    }

    fn copy_key(&self, bucket: &Bucket, from_key: &str, to_key: &str, path: &PathSpec) -> Result<()> {
        let scheme = self.scheme;
        let encoded = utf8_percent_encode(from_key, COPY_SOURCE).to_string();
        debug!(%scheme, from = from_key, to = to_key, "Server-side copy");
        let code = self.runtime.block_on(|| async move {
            bucket
                .copy_object_internal(&encoded, to_key)
                .await
                .map_err(|e| s3_error(scheme, e))
        })?;
        check_status(scheme, code, path)
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("bucket cache lock poisoned".to_string())
}

fn s3_error(scheme: Scheme, err: S3Error) -> Error {
    match err {
        S3Error::HttpFailWithBody(code, body) => status_error(scheme, code, body.trim()),
        other => {
            let text = other.to_string();
            if text.contains("NoSuchBucket") {
                Error::NotFound(text)
            } else {
                Error::backend(scheme, text)
            }
        }
    }
}

fn check_status(scheme: Scheme, code: u16, path: &PathSpec) -> Result<()> {
    match code {
        200..=299 => Ok(()),
        _ => Err(status_error(scheme, code, path)),
    }
}

fn status_error(scheme: Scheme, code: u16, subject: impl fmt::Display) -> Error {
    match code {
        404 => Error::NotFound(subject.to_string()),
        401 | 403 => Error::PermissionDenied(format!("{} (HTTP {})", subject, code)),
        _ => Error::backend(scheme, format!("HTTP {} for {}", code, subject)),
    }
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn dir_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// Read up to one part from `file`.
async fn read_part(file: &mut tokio::fs::File) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; PART_SIZE];
    let mut filled = 0;
    while filled < PART_SIZE {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Upload the contents of `file` to `key`, one request for small objects and
/// multipart otherwise.
async fn upload(
    scheme: Scheme,
    bucket: &Bucket,
    key: &str,
    file: File,
    path: &PathSpec,
    progress: Progress<'_>,
) -> Result<u64> {
    let mut file = tokio::fs::File::from_std(file);
    let first = read_part(&mut file).await?;

    if first.len() < PART_SIZE {
        let len = first.len() as u64;
        let response = bucket
            .put_object(key, &first)
            .await
            .map_err(|e| s3_error(scheme, e))?;
        check_status(scheme, response.status_code(), path)?;
        progress(len);
        return Ok(len);
    }

    let upload_id = bucket
        .initiate_multipart_upload(key, CONTENT_TYPE)
        .await
        .map_err(|e| s3_error(scheme, e))?
        .upload_id;
    debug!(%scheme, key, %upload_id, "Multipart upload started");

    let parts = async {
        let mut parts: Vec<Part> = Vec::new();
        let mut total = 0u64;
        let mut chunk = first;
        let mut part_number = 1u32;
        while !chunk.is_empty() {
            let len = chunk.len() as u64;
            let part = bucket
                .put_multipart_chunk(chunk, key, part_number, &upload_id, CONTENT_TYPE)
                .await
                .map_err(|e| s3_error(scheme, e))?;
            parts.push(part);
            total += len;
            progress(len);
            part_number += 1;
            chunk = read_part(&mut file).await?;
        }
        let response = bucket
            .complete_multipart_upload(key, &upload_id, parts)
            .await
            .map_err(|e| s3_error(scheme, e))?;
        check_status(scheme, response.status_code(), path)?;
        Ok::<u64, Error>(total)
    }
    .await;

    if parts.is_err() {
        let _ = bucket.abort_upload(key, &upload_id).await;
    }
    parts
}

/// Spools writes into a temporary file and uploads it on `finish`.
struct S3Writer {
    scheme: Scheme,
    runtime: Arc<ObjectRuntime>,
    bucket: Box<Bucket>,
    key: String,
    path: PathSpec,
    spool: BufWriter<File>,
}

impl Write for S3Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.spool.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.spool.flush()
    }
}

impl WriteStream for S3Writer {
    fn finish(self: Box<Self>) -> Result<()> {
        let S3Writer {
            scheme,
            runtime,
            bucket,
            key,
            path,
            spool,
        } = *self;
        let mut file = spool
            .into_inner()
            .map_err(|e| Error::from_io(e.into_error(), &path))?;
        file.seek(SeekFrom::Start(0))?;

        let bytes = runtime.block_on(|| {
            let (bucket, key, path) = (&bucket, &key, &path);
            async move { upload(scheme, bucket, key, file, path, &|_: u64| {}).await }
        })?;
        debug!(%scheme, %path, bytes, "Object written");
        Ok(())
    }
}

impl Accessor for S3Accessor {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn stat(&self, path: &PathSpec) -> Result<Metadata> {
        let Some((bucket, key)) = self.locate(path)? else {
            return Ok(Metadata::directory(path.clone()));
        };
        let scheme = self.scheme;

        if key.is_empty() {
            let bucket = &bucket;
            self.runtime.block_on(|| async move {
                bucket
                    .list(String::new(), Some("/".to_string()))
                    .await
                    .map_err(|e| s3_error(scheme, e))
            })?;
            return Ok(Metadata::directory(path.clone()));
        }

        let (head, code) = {
            let (bucket, key) = (&bucket, &key);
            self.runtime.block_on(|| async move {
                bucket.head_object(key).await.map_err(|e| s3_error(scheme, e))
            })?
        };
        match code {
            200..=299 => {
                let size = head.content_length.unwrap_or(0).max(0) as u64;
                let modified = head.last_modified.as_deref().and_then(parse_time);
                return Ok(Metadata::file(path.clone(), size)
                    .with_modified(modified)
                    .with_etag(head.e_tag));
            }
            404 => {}
            other => check_status(scheme, other, path)?,
        }

        let prefix = dir_prefix(&key);
        let bucket = &bucket;
        let pages = self.runtime.block_on(|| async move {
            bucket
                .list(prefix, Some("/".to_string()))
                .await
                .map_err(|e| s3_error(scheme, e))
        })?;
        let is_dir = pages
            .iter()
            .any(|p| !p.contents.is_empty() || p.common_prefixes.as_ref().is_some_and(|c| !c.is_empty()));
        if is_dir {
            Ok(Metadata::directory(path.clone()))
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    fn list(&self, path: &PathSpec) -> Result<Vec<Metadata>> {
        let (bucket, key) = self.locate(path)?.ok_or_else(|| {
            Error::InvalidArgument(format!("listing buckets of {} is not supported", path))
        })?;
        let scheme = self.scheme;
        let prefix = dir_prefix(&key);

        let pages = {
            let (bucket, prefix) = (&bucket, prefix.clone());
            self.runtime.block_on(|| async move {
                bucket
                    .list(prefix, Some("/".to_string()))
                    .await
                    .map_err(|e| s3_error(scheme, e))
            })?
        };

        let mut seen = 0usize;
        let mut entries = Vec::new();
        for page in pages {
            for cp in page.common_prefixes.unwrap_or_default() {
                seen += 1;
                let name = cp.prefix.trim_end_matches('/').rsplit('/').next().unwrap_or("");
                if !name.is_empty() {
                    entries.push(Metadata::directory(path.join(name)));
                }
            }
            for obj in page.contents {
                seen += 1;
                if obj.key.ends_with('/') {
                    continue;
                }
                let name = obj.key.rsplit('/').next().unwrap_or(&obj.key);
                entries.push(
                    Metadata::file(path.join(name), obj.size as u64)
                        .with_modified(parse_time(&obj.last_modified))
                        .with_etag(obj.e_tag.clone()),
                );
            }
        }

        if seen == 0 && !key.is_empty() {
            let meta = self.stat(path)?;
            if !meta.is_directory {
                return Err(Error::InvalidArgument(format!("Not a directory: {}", path)));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn walk(&self, path: &PathSpec) -> Result<Vec<Metadata>> {
        let (bucket, key) = self.locate(path)?.ok_or_else(|| {
            Error::InvalidArgument(format!("walking buckets of {} is not supported", path))
        })?;
        let scheme = self.scheme;
        let prefix = dir_prefix(&key);

        let pages = {
            let (bucket, prefix) = (&bucket, prefix.clone());
            self.runtime.block_on(|| async move {
                bucket.list(prefix, None).await.map_err(|e| s3_error(scheme, e))
            })?
        };

        let mut entries: BTreeMap<String, Metadata> = BTreeMap::new();
        for obj in pages.into_iter().flat_map(|p| p.contents) {
            let Some(rel) = obj.key.strip_prefix(&prefix) else {
                continue;
            };
            let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                continue;
            }
            let dir_depth = if rel.ends_with('/') {
                segments.len()
            } else {
                segments.len() - 1
            };
            for depth in 1..=dir_depth {
                let rel_dir = segments[..depth].join("/");
                entries
                    .entry(rel_dir.clone())
                    .or_insert_with(|| Metadata::directory(path.join(&rel_dir)));
            }
            if !rel.ends_with('/') {
                let rel_file = segments.join("/");
                entries.insert(
                    rel_file.clone(),
                    Metadata::file(path.join(&rel_file), obj.size as u64)
                        .with_modified(parse_time(&obj.last_modified))
                        .with_etag(obj.e_tag.clone()),
                );
            }
        }
        Ok(entries.into_values().collect())
    }

    fn open_read(&self, path: &PathSpec) -> Result<ReadStream> {
        let (bucket, key) = self.require_object(path)?;
        let scheme = self.scheme;
        let spool = tempfile::tempfile()?;

        let file = {
            let (bucket, key) = (&bucket, &key);
            self.runtime.block_on(|| async move {
                let mut out = tokio::fs::File::from_std(spool);
                let code = bucket
                    .get_object_to_writer(key, &mut out)
                    .await
                    .map_err(|e| s3_error(scheme, e))?;
                check_status(scheme, code, path)?;
                out.flush().await?;
                Ok::<_, Error>(out.into_std().await)
            })?
        };

        let mut file = file;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    fn open_write(&self, path: &PathSpec) -> Result<Box<dyn WriteStream>> {
        let (bucket, key) = self.require_object(path)?;
        Ok(Box::new(S3Writer {
            scheme: self.scheme,
            runtime: Arc::clone(&self.runtime),
            bucket,
            key,
            path: path.clone(),
            spool: BufWriter::new(tempfile::tempfile()?),
        }))
    }

    fn copy(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let (from_bucket, from_key) = self.require_object(from)?;
        let (to_bucket, to_key) = self.require_object(to)?;

        if from_bucket.name() == to_bucket.name() {
            return self.copy_key(&from_bucket, &from_key, &to_key, from);
        }

        let mut reader = self.open_read(from)?;
        let mut writer = self.open_write(to)?;
        pump(&mut reader, &mut writer, &|_: u64| {})?;
        writer.finish()
    }

    fn rename(&self, from: &PathSpec, to: &PathSpec) -> Result<()> {
        let meta = self.stat(from)?;
        if !meta.is_directory {
            self.copy(from, to)?;
            return self.remove(from);
        }

        let (from_bucket, from_key) = self.require_object(from)?;
        let (to_bucket, to_key) = self.require_object(to)?;
        if from_bucket.name() != to_bucket.name() {
            return Err(Error::InvalidArgument(format!(
                "cannot rename directory {} across buckets",
                from
            )));
        }
        let from_prefix = dir_prefix(&from_key);
        let to_prefix = dir_prefix(&to_key);
        for old_key in self.keys_below(&from_bucket, &from_prefix)? {
            let new_key = format!("{}{}", to_prefix, &old_key[from_prefix.len()..]);
            self.copy_key(&from_bucket, &old_key, &new_key, from)?;
            self.delete_key(&from_bucket, &old_key, from)?;
        }
        Ok(())
    }

    fn remove(&self, path: &PathSpec) -> Result<()> {
        let (bucket, key) = self.require_object(path)?;
        if self.stat(path)?.is_directory {
            return Err(Error::InvalidArgument(format!("Cannot delete directory: {}", path)));
        }
        debug!(scheme = %self.scheme, %path, "Deleting object");
        self.delete_key(&bucket, &key, path)
    }

    fn remove_dir(&self, path: &PathSpec, recursive: bool) -> Result<()> {
        let (bucket, key) = self.require_object(path)?;
        let prefix = dir_prefix(&key);
        let keys = self.keys_below(&bucket, &prefix)?;
        if keys.is_empty() {
            return match self.stat(path) {
                Ok(_) => Err(Error::InvalidArgument(format!("Not a directory: {}", path))),
                Err(e) => Err(e),
            };
        }
        if !recursive && keys.iter().any(|k| *k != prefix) {
            return Err(Error::InvalidArgument(format!("Directory not empty: {}", path)));
        }
        for key in keys {
            self.delete_key(&bucket, &key, path)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &PathSpec, _parents: bool, exist_ok: bool) -> Result<()> {
        let (bucket, key) = self.require(path)?;
        match self.stat(path) {
            Ok(meta) if meta.is_directory && exist_ok => return Ok(()),
            Ok(_) => return Err(Error::AlreadyExists(path.to_string())),
            Err(e) if e.is_not_found() && !key.is_empty() => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::InvalidArgument(format!("creating bucket {} is not supported", path)));
            }
            Err(e) => return Err(e),
        }

        let scheme = self.scheme;
        let marker = dir_prefix(&key);
        let code = {
            let (bucket, marker) = (&bucket, &marker);
            self.runtime.block_on(|| async move {
                bucket
                    .put_object(marker, &[])
                    .await
                    .map(|r| r.status_code())
                    .map_err(|e| s3_error(scheme, e))
            })?
        };
        check_status(scheme, code, path)
    }

    fn put_file(&self, source: &Path, dest: &PathSpec, progress: Progress<'_>) -> Result<u64> {
        let (bucket, key) = self.require_object(dest)?;
        let file = File::open(source).map_err(|e| Error::from_io(e, source.display()))?;
        let scheme = self.scheme;
        debug!(%scheme, source = %source.display(), %dest, "Uploading file");
        let (bucket, key) = (&bucket, &key);
        self.runtime
            .block_on(|| async move { upload(scheme, bucket, key, file, dest, progress).await })
    }

    fn get_file(&self, source: &PathSpec, dest: &Path, progress: Progress<'_>) -> Result<u64> {
        let (bucket, key) = self.require_object(source)?;
        ensure_parent(dest)?;
        let scheme = self.scheme;
        debug!(%scheme, %source, dest = %dest.display(), "Downloading file");

        let result = {
            let (bucket, key) = (&bucket, &key);
            self.runtime.block_on(|| async move {
                let mut out = tokio::fs::File::create(dest)
                    .await
                    .map_err(|e| Error::from_io(e, dest.display()))?;
                let code = bucket
                    .get_object_to_writer(key, &mut out)
                    .await
                    .map_err(|e| s3_error(scheme, e))?;
                check_status(scheme, code, source)?;
                out.flush().await?;
                Ok::<_, Error>(out.metadata().await?.len())
            })
        };

        match result {
            Ok(bytes) => {
                progress(bytes);
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(dest);
                Err(e)
            }
        }
    }

    fn transfer_concurrency(&self) -> usize {
        self.concurrency
    }

    fn close(&self) -> Result<()> {
        self.buckets.write().map_err(poisoned)?.clear();
        debug!(scheme = %self.scheme, "S3 accessor closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unipath_common::Secret;

    fn bundle(endpoint: &str) -> CredentialBundle {
        CredentialBundle {
            endpoint: Some(endpoint.to_string()),
            access_key_id: Some("minioadmin".into()),
            secret_access_key: Some(Secret::new("minioadmin")),
            path_style: true,
            ..CredentialBundle::default()
        }
    }

    #[test]
    fn test_new_requires_endpoint_for_compatible_schemes() {
        let err = S3Accessor::new(Scheme::Minio, &CredentialBundle::default()).err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable { .. }));

        assert!(S3Accessor::new(Scheme::S3, &CredentialBundle::default()).is_ok());
    }

    #[test]
    fn test_new_rejects_bad_endpoint_and_scheme() {
        assert!(matches!(
            S3Accessor::new(Scheme::S3Compat, &bundle("not a url")),
            Err(Error::BackendUnavailable { .. })
        ));
        assert!(matches!(
            S3Accessor::new(Scheme::Memory, &bundle("http://localhost:9000")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_concurrency_option() {
        let mut b = bundle("http://localhost:9000");
        b.options.insert("max_concurrency".into(), "3".into());
        let accessor = S3Accessor::new(Scheme::Minio, &b).unwrap();
        assert_eq!(accessor.transfer_concurrency(), 3);

        b.options.insert("max_concurrency".into(), "lots".into());
        assert!(S3Accessor::new(Scheme::Minio, &b).is_err());
    }

    #[test]
    fn test_root_stat_needs_no_network() {
        let accessor = S3Accessor::new(Scheme::Minio, &bundle("http://localhost:9000")).unwrap();
        let root = PathSpec::root(Scheme::Minio);
        assert!(accessor.stat(&root).unwrap().is_directory);
        assert!(matches!(accessor.open_write(&root), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_foreign_scheme() {
        let accessor = S3Accessor::new(Scheme::Minio, &bundle("http://localhost:9000")).unwrap();
        let path = PathSpec::parse("s3://bucket/key").unwrap();
        assert!(matches!(accessor.stat(&path), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_status_mapping() {
        let path = PathSpec::parse("s3://b/k").unwrap();
        assert!(check_status(Scheme::S3, 204, &path).is_ok());
        assert!(matches!(check_status(Scheme::S3, 404, &path), Err(Error::NotFound(_))));
        assert!(matches!(check_status(Scheme::S3, 403, &path), Err(Error::PermissionDenied(_))));
        assert!(matches!(check_status(Scheme::S3, 503, &path), Err(Error::BackendUnavailable { .. })));
    }

    #[test]
    fn test_http_failures_keep_their_status() {
        let missing = s3_error(Scheme::S3, S3Error::HttpFailWithBody(404, "<Code>NoSuchKey</Code>".into()));
        assert!(missing.is_not_found());

        let denied = s3_error(Scheme::R2, S3Error::HttpFailWithBody(403, "<Code>AccessDenied</Code>".into()));
        assert!(matches!(denied, Error::PermissionDenied(ref m) if m.contains("AccessDenied")));
        let unauthorized = s3_error(Scheme::R2, S3Error::HttpFailWithBody(401, String::new()));
        assert!(matches!(unauthorized, Error::PermissionDenied(_)));

        let throttled = s3_error(Scheme::S3, S3Error::HttpFailWithBody(503, "SlowDown".into()));
        assert!(throttled.is_transient());
    }

    #[test]
    fn test_other_failures_are_backend_unavailable() {
        let err = s3_error(Scheme::Minio, S3Error::HttpFail);
        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2009-10-12T17:50:30.000Z").is_some());
        assert!(parse_time("Wed, 21 Oct 2015 07:28:00 GMT").is_some());
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn test_copy_source_encoding() {
        let encoded = utf8_percent_encode("dir/a file+x.txt", COPY_SOURCE).to_string();
        assert_eq!(encoded, "dir/a%20file%2Bx.txt");
    }
}
