//! Bulk transfer orchestration.
//!
//! A batch call plans a list of (source, destination) pairs, drops the ones
//! whose destination already exists when asked to, then runs the rest
//! through one [`TransferManager`] shared by the whole call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::path::UniPath;
use unipath_common::{Error, Result};
use unipath_storage::{TransferManager, TransferRequest, TransferSubscriber};

/// Local files feeding a batch upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    /// Explicit files, uploaded under their own names.
    Files(Vec<PathBuf>),
    /// Files below `root` matching `pattern`, uploaded under their path relative to `root`.
    Glob { root: PathBuf, pattern: String },
}

impl BatchSource {
    pub fn files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        BatchSource::Files(files.into_iter().map(Into::into).collect())
    }

    pub fn glob(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        BatchSource::Glob {
            root: root.into(),
            pattern: pattern.into(),
        }
    }
}

/// Policy for a batch call.
#[derive(Clone)]
pub struct TransferOptions {
    /// Replace existing destinations.
    pub overwrite: bool,
    /// Silently drop entries whose destination exists (ignored with `overwrite`).
    pub skip_existing: bool,
    /// Keep going after a failed entry and report it instead of failing the call.
    pub tolerate_failures: bool,
    /// Attached to every submitted transfer.
    pub subscribers: Vec<Arc<dyn TransferSubscriber>>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            skip_existing: true,
            tolerate_failures: false,
            subscribers: Vec::new(),
        }
    }
}

impl TransferOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn tolerate_failures(mut self, tolerate: bool) -> Self {
        self.tolerate_failures = tolerate;
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn TransferSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("overwrite", &self.overwrite)
            .field("skip_existing", &self.skip_existing)
            .field("tolerate_failures", &self.tolerate_failures)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// One planned transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEntry {
    pub source: UniPath,
    pub destination: UniPath,
}

/// A transfer that did not complete.
#[derive(Debug)]
pub struct TransferFailure {
    pub entry: TransferEntry,
    pub error: Error,
}

/// Outcome of a failure-tolerant batch call.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Destinations written, in plan order.
    pub transferred: Vec<UniPath>,
    /// Destinations left alone because they already existed.
    pub skipped: Vec<UniPath>,
    pub failed: Vec<TransferFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Plan {
    entries: Vec<TransferEntry>,
    skipped: Vec<UniPath>,
    failed: Vec<TransferFailure>,
}

fn plan(candidates: Vec<TransferEntry>, options: &TransferOptions) -> Result<Plan> {
    let mut plan = Plan {
        entries: Vec::with_capacity(candidates.len()),
        skipped: Vec::new(),
        failed: Vec::new(),
    };
    for entry in candidates {
        if options.overwrite || !entry.destination.exists()? {
            plan.entries.push(entry);
        } else if options.skip_existing {
            plan.skipped.push(entry.destination);
        } else {
            let error = Error::AlreadyExists(entry.destination.to_string());
            if !options.tolerate_failures {
                return Err(error);
            }
            plan.failed.push(TransferFailure { entry, error });
        }
    }
    Ok(plan)
}

fn local_file(path: &UniPath) -> Result<PathBuf> {
    path.to_std_path()
        .ok_or_else(|| Error::InvalidArgument(format!("{} is not a local path", path)))
}

fn run(remote: &UniPath, upload: bool, plan: Plan, options: &TransferOptions) -> Result<BatchReport> {
    let Plan {
        entries,
        skipped,
        failed,
    } = plan;
    let mut report = BatchReport {
        transferred: Vec::new(),
        skipped,
        failed,
    };
    if entries.is_empty() {
        return Ok(report);
    }

    let mut manager = TransferManager::for_accessor(remote.accessor()?)?;
    let mut outcomes: Vec<Option<Result<u64>>> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let request = if upload {
            TransferRequest::upload(local_file(&entry.source)?, entry.destination.as_ref().clone())
        } else {
            TransferRequest::download(entry.source.as_ref().clone(), local_file(&entry.destination)?)
        };
        manager.submit(request, options.subscribers.clone())?;
        outcomes.push(None);
    }

    let mut first_error = None;
    while let Some((id, result)) = manager.next_completion() {
        match result {
            Err(e) if !options.tolerate_failures => {
                if first_error.is_none() {
                    let dropped = manager.cancel_pending();
                    warn!(error = %e, dropped, "Batch transfer failed, cancelling the rest");
                    first_error = Some(e);
                }
            }
            result => {
                if let Some(slot) = outcomes.get_mut(id) {
                    *slot = Some(result);
                }
            }
        }
    }
    manager.shutdown();
    if let Some(e) = first_error {
        return Err(e);
    }

    for (entry, outcome) in entries.into_iter().zip(outcomes) {
        match outcome {
            Some(Ok(_)) => report.transferred.push(entry.destination),
            Some(Err(error)) => {
                warn!(source = %entry.source, error = %error, "Transfer failed");
                report.failed.push(TransferFailure { entry, error });
            }
            None => {}
        }
    }
    info!(
        transferred = report.transferred.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch transfer finished"
    );
    Ok(report)
}

fn finish(report: BatchReport) -> Result<Vec<UniPath>> {
    match report.failed.into_iter().next() {
        Some(failure) => Err(failure.error),
        None => Ok(report.transferred),
    }
}

impl UniPath {
    fn upload_candidates(&self, source: &BatchSource) -> Result<Vec<TransferEntry>> {
        let pairs: Vec<(PathBuf, String)> = match source {
            BatchSource::Files(files) => files
                .iter()
                .map(|file| {
                    if !file.is_file() {
                        return Err(Error::NotFound(file.display().to_string()));
                    }
                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!("{} has no file name", file.display()))
                        })?;
                    Ok((file.clone(), name))
                })
                .collect::<Result<_>>()?,
            BatchSource::Glob { root, pattern } => {
                let base = self.local_path(root);
                let mut pairs = Vec::new();
                for found in base.glob(pattern).iter() {
                    let found = found?;
                    if !found.is_file()? {
                        continue;
                    }
                    let relative = found.relative_to(&base)?.segments().join("/");
                    pairs.push((local_file(&found)?, relative));
                }
                pairs
            }
        };
        Ok(pairs
            .into_iter()
            .map(|(file, relative)| TransferEntry {
                source: self.local_path(file),
                destination: self.join(&relative),
            })
            .collect())
    }

    fn download_candidates(&self, pattern: &str, output_dir: &Path) -> Result<Vec<TransferEntry>> {
        let mut entries = Vec::new();
        for found in self.glob(pattern).iter() {
            let found = found?;
            if !found.is_file()? {
                continue;
            }
            let relative = found.relative_to(self)?;
            let mut local = output_dir.to_path_buf();
            local.extend(relative.segments());
            entries.push(TransferEntry {
                destination: self.local_path(local),
                source: found,
            });
        }
        Ok(entries)
    }

    /// Upload many local files into this directory.
    ///
    /// Returns the destinations written, in source order. Entries skipped
    /// because their destination exists are not included.
    ///
    /// # Errors
    /// - the first transfer failure; transfers not yet started are cancelled
    /// - `AlreadyExists` when a destination exists and neither `overwrite`
    ///   nor `skip_existing` is set, before anything is transferred
    pub fn batch_upload_files(&self, source: &BatchSource, options: &TransferOptions) -> Result<Vec<UniPath>> {
        let options = options.clone().tolerate_failures(false);
        finish(self.batch_upload_report(source, &options)?)
    }

    /// Like [`UniPath::batch_upload_files`], returning the full report.
    /// With `tolerate_failures` set, failed entries are listed instead of
    /// failing the call.
    pub fn batch_upload_report(&self, source: &BatchSource, options: &TransferOptions) -> Result<BatchReport> {
        let plan = plan(self.upload_candidates(source)?, options)?;
        run(self, true, plan, options)
    }

    /// Download every object below this directory matching `pattern` into
    /// `output_dir`, keeping the layout relative to this directory.
    pub fn batch_download_files(
        &self,
        pattern: &str,
        output_dir: &Path,
        options: &TransferOptions,
    ) -> Result<Vec<UniPath>> {
        let options = options.clone().tolerate_failures(false);
        finish(self.batch_download_report(pattern, output_dir, &options)?)
    }

    /// Like [`UniPath::batch_download_files`], returning the full report.
    pub fn batch_download_report(
        &self,
        pattern: &str,
        output_dir: &Path,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        let plan = plan(self.download_candidates(pattern, output_dir)?, options)?;
        run(self, false, plan, options)
    }
}
