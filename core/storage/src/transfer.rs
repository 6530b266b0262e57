//! Transfer manager: single-object uploads and downloads against one
//! accessor, run as blocking tasks on a Tokio runtime the manager owns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::accessor::Accessor;
use unipath_common::{Error, PathSpec, Result};

/// Which way a transfer moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local file to the accessor's storage.
    Upload,
    /// Accessor's storage to a local file.
    Download,
}

/// One single-object transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub local: PathBuf,
    pub remote: PathSpec,
}

impl TransferRequest {
    pub fn upload(local: impl Into<PathBuf>, remote: PathSpec) -> Self {
        Self {
            direction: TransferDirection::Upload,
            local: local.into(),
            remote,
        }
    }

    pub fn download(remote: PathSpec, local: impl Into<PathBuf>) -> Self {
        Self {
            direction: TransferDirection::Download,
            local: local.into(),
            remote,
        }
    }
}

/// Observer of transfer progress. Every callback is optional.
pub trait TransferSubscriber: Send + Sync {
    /// The request entered the queue.
    fn on_queued(&self, _request: &TransferRequest) {}

    /// `bytes` more bytes were moved for the request.
    fn on_progress(&self, _request: &TransferRequest, _bytes: u64) {}

    /// The request finished, successfully or not.
    fn on_done(&self, _request: &TransferRequest, _result: &Result<u64>) {}
}

type Completion = (usize, Result<u64>);

struct Job {
    accessor: Arc<dyn Accessor>,
    request: TransferRequest,
    subscribers: Vec<Arc<dyn TransferSubscriber>>,
}

/// Runs submitted transfers, at most `concurrency` at a time.
///
/// Every transfer is a Tokio task that waits for a semaphore permit and then
/// moves its bytes on the runtime's blocking pool. Completions are reported
/// through [`TransferManager::next_completion`] in the order they finish. The
/// runtime is torn down exactly once, either by [`TransferManager::shutdown`]
/// or on drop.
pub struct TransferManager {
    accessor: Arc<dyn Accessor>,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    /// One flag per submitted transfer, set once it starts or is cancelled.
    claims: Vec<Arc<AtomicBool>>,
    reply: Sender<Completion>,
    completions: Receiver<Completion>,
    next_id: usize,
    outstanding: usize,
}

impl TransferManager {
    /// Start a manager using the accessor's own concurrency hint.
    pub fn for_accessor(accessor: Arc<dyn Accessor>) -> Result<Self> {
        let concurrency = accessor.transfer_concurrency();
        Self::new(accessor, concurrency)
    }

    /// Start a manager running up to `concurrency` transfers at once.
    ///
    /// # Errors
    /// - `Internal` if the runtime cannot be started
    pub fn new(accessor: Arc<dyn Accessor>, concurrency: usize) -> Result<Self> {
        let scheme = accessor.scheme();
        let concurrency = concurrency.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(concurrency)
            .thread_name(format!("unipath-transfer-{}", scheme))
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("failed to start transfer runtime: {}", e)))?;
        let (reply, completions) = mpsc::channel();
        debug!(%scheme, concurrency, "Transfer manager started");
        Ok(Self {
            accessor,
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(concurrency)),
            claims: Vec::new(),
            reply,
            completions,
            next_id: 0,
            outstanding: 0,
        })
    }

    /// Queue a transfer and return its id. Ids count up from zero.
    pub fn submit(
        &mut self,
        request: TransferRequest,
        subscribers: Vec<Arc<dyn TransferSubscriber>>,
    ) -> Result<usize> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("transfer manager is shut down".into()))?;
        let id = self.next_id;
        for subscriber in &subscribers {
            notify(&request, "on_queued", || subscriber.on_queued(&request));
        }

        let claim = Arc::new(AtomicBool::new(false));
        let started = Arc::clone(&claim);
        let permits = Arc::clone(&self.permits);
        let reply = self.reply.clone();
        let job = Job {
            accessor: Arc::clone(&self.accessor),
            request,
            subscribers,
        };
        runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if started.swap(true, Ordering::AcqRel) {
                // Cancelled while waiting for a permit.
                return;
            }
            let remote = job.request.remote.to_string();
            let result = tokio::task::spawn_blocking(move || run_job(job))
                .await
                .unwrap_or_else(|_| Err(Error::Internal(format!("transfer of {} panicked", remote))));
            let _ = reply.send((id, result));
        });

        self.claims.push(claim);
        self.next_id += 1;
        self.outstanding += 1;
        Ok(id)
    }

    /// Drop every queued transfer that has not started. Returns how many were dropped.
    pub fn cancel_pending(&mut self) -> usize {
        let dropped = self
            .claims
            .drain(..)
            .filter(|claim| !claim.swap(true, Ordering::AcqRel))
            .count();
        self.outstanding -= dropped;
        if dropped > 0 {
            debug!(dropped, "Cancelled pending transfers");
        }
        dropped
    }

    /// Block until the next transfer completes. `None` once nothing is outstanding.
    pub fn next_completion(&mut self) -> Option<(usize, Result<u64>)> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.completions.recv().ok()?;
        self.outstanding -= 1;
        Some(completion)
    }

    /// Number of submitted transfers not yet reported.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Wait for submitted transfers to finish and stop the runtime.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        while self.outstanding > 0 && self.completions.recv().is_ok() {
            self.outstanding -= 1;
        }
        // Dropping a runtime blocks, which panics inside async contexts.
        runtime.shutdown_background();
        debug!("Transfer manager stopped");
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_job(job: Job) -> Result<u64> {
    let Job {
        accessor,
        request,
        subscribers,
    } = job;

    let progress = |bytes: u64| {
        for subscriber in &subscribers {
            notify(&request, "on_progress", || subscriber.on_progress(&request, bytes));
        }
    };
    let result = catch_unwind(AssertUnwindSafe(|| match request.direction {
        TransferDirection::Upload => accessor.put_file(&request.local, &request.remote, &progress),
        TransferDirection::Download => accessor.get_file(&request.remote, &request.local, &progress),
    }))
    .unwrap_or_else(|_| Err(Error::Internal(format!("transfer of {} panicked", request.remote))));

    match &result {
        Ok(bytes) => debug!(remote = %request.remote, bytes, "Transfer finished"),
        Err(e) => debug!(remote = %request.remote, error = %e, "Transfer failed"),
    }
    for subscriber in &subscribers {
        notify(&request, "on_done", || subscriber.on_done(&request, &result));
    }
    result
}

/// Run one subscriber callback; a panicking subscriber is logged and ignored.
fn notify(request: &TransferRequest, callback: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(remote = %request.remote, callback, "Transfer subscriber panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccessor;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counter {
        queued: AtomicUsize,
        done: AtomicUsize,
        bytes: AtomicU64,
    }

    impl TransferSubscriber for Counter {
        fn on_queued(&self, _request: &TransferRequest) {
            self.queued.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, _request: &TransferRequest, bytes: u64) {
            self.bytes.fetch_add(bytes, Ordering::SeqCst);
        }

        fn on_done(&self, _request: &TransferRequest, _result: &Result<u64>) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn remote(key: &str) -> PathSpec {
        PathSpec::parse(&format!("mem://bucket/{}", key)).unwrap()
    }

    #[test]
    fn test_uploads_and_downloads() {
        let temp = TempDir::new().unwrap();
        let accessor = Arc::new(MemoryAccessor::new());
        let counter = Arc::new(Counter::default());
        let mut manager = TransferManager::new(accessor.clone(), 3).unwrap();

        for i in 0..5 {
            let local = temp.path().join(format!("f{}.txt", i));
            std::fs::write(&local, vec![b'x'; 10]).unwrap();
            let subscribers: Vec<Arc<dyn TransferSubscriber>> = vec![counter.clone()];
            manager
                .submit(TransferRequest::upload(local, remote(&format!("f{}.txt", i))), subscribers)
                .unwrap();
        }

        let mut results = Vec::new();
        while let Some((id, result)) = manager.next_completion() {
            results.push((id, result.unwrap()));
        }
        results.sort();
        assert_eq!(results, (0..5).map(|i| (i, 10)).collect::<Vec<_>>());
        assert_eq!(accessor.object_count(), 5);
        assert_eq!(counter.queued.load(Ordering::SeqCst), 5);
        assert_eq!(counter.done.load(Ordering::SeqCst), 5);
        assert_eq!(counter.bytes.load(Ordering::SeqCst), 50);

        let back = temp.path().join("back/f0.txt");
        manager
            .submit(TransferRequest::download(remote("f0.txt"), &back), Vec::new())
            .unwrap();
        let (_, result) = manager.next_completion().unwrap();
        assert_eq!(result.unwrap(), 10);
        assert!(back.exists());
        manager.shutdown();
    }

    #[test]
    fn test_failure_is_reported() {
        let accessor = Arc::new(MemoryAccessor::new());
        let mut manager = TransferManager::new(accessor, 1).unwrap();
        manager
            .submit(TransferRequest::upload("/definitely/missing/file", remote("x")), Vec::new())
            .unwrap();
        let (_, result) = manager.next_completion().unwrap();
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(manager.next_completion().is_none());
    }

    #[test]
    fn test_cancel_pending_and_drop() {
        let temp = TempDir::new().unwrap();
        let accessor = Arc::new(MemoryAccessor::new());
        let mut manager = TransferManager::new(accessor, 1).unwrap();
        for i in 0..20 {
            let local = temp.path().join(format!("{}.bin", i));
            std::fs::write(&local, b"data").unwrap();
            manager.submit(TransferRequest::upload(local, remote(&format!("{}.bin", i))), Vec::new()).unwrap();
        }
        let dropped = manager.cancel_pending();
        let mut completed = 0;
        while manager.next_completion().is_some() {
            completed += 1;
        }
        assert_eq!(dropped + completed, 20);
        drop(manager);
    }

    struct Unruly;

    impl TransferSubscriber for Unruly {
        fn on_queued(&self, _request: &TransferRequest) {
            panic!("queued");
        }

        fn on_progress(&self, _request: &TransferRequest, _bytes: u64) {
            panic!("progress");
        }

        fn on_done(&self, _request: &TransferRequest, _result: &Result<u64>) {
            panic!("done");
        }
    }

    #[test]
    fn test_panicking_subscriber_still_completes() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("a.txt");
        std::fs::write(&local, b"abc").unwrap();
        let accessor = Arc::new(MemoryAccessor::new());
        let counter = Arc::new(Counter::default());
        let mut manager = TransferManager::new(accessor.clone(), 2).unwrap();

        let subscribers: Vec<Arc<dyn TransferSubscriber>> = vec![Arc::new(Unruly), counter.clone()];
        manager.submit(TransferRequest::upload(local, remote("a.txt")), subscribers).unwrap();

        let (id, result) = manager.next_completion().unwrap();
        assert_eq!(id, 0);
        assert_eq!(result.unwrap(), 3);
        assert_eq!(accessor.object_count(), 1);
        assert_eq!(counter.queued.load(Ordering::SeqCst), 1);
        assert_eq!(counter.bytes.load(Ordering::SeqCst), 3);
        assert_eq!(counter.done.load(Ordering::SeqCst), 1);
        assert!(manager.next_completion().is_none());
    }

    #[derive(Default)]
    struct ThreadNames(Mutex<Vec<String>>);

    impl TransferSubscriber for ThreadNames {
        fn on_done(&self, _request: &TransferRequest, _result: &Result<u64>) {
            let name = std::thread::current().name().unwrap_or_default().to_string();
            self.0.lock().unwrap().push(name);
        }
    }

    #[tokio::test]
    async fn test_transfers_run_on_owned_runtime() {
        let temp = TempDir::new().unwrap();
        let accessor = Arc::new(MemoryAccessor::new());
        let names = Arc::new(ThreadNames::default());
        let mut manager = TransferManager::new(accessor, 2).unwrap();
        for i in 0..4 {
            let local = temp.path().join(format!("{}.bin", i));
            std::fs::write(&local, b"data").unwrap();
            let subscribers: Vec<Arc<dyn TransferSubscriber>> = vec![names.clone()];
            manager.submit(TransferRequest::upload(local, remote(&format!("{}.bin", i))), subscribers).unwrap();
        }
        while let Some((_, result)) = manager.next_completion() {
            result.unwrap();
        }
        // Dropping inside an async context must not panic.
        drop(manager);

        let names = names.0.lock().unwrap();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| n == "unipath-transfer-mem"));
    }

    #[test]
    fn test_shutdown_waits_for_submitted_transfers() {
        let temp = TempDir::new().unwrap();
        let accessor = Arc::new(MemoryAccessor::new());
        let mut manager = TransferManager::new(accessor.clone(), 1).unwrap();
        for i in 0..5 {
            let local = temp.path().join(format!("{}.bin", i));
            std::fs::write(&local, b"data").unwrap();
            manager.submit(TransferRequest::upload(local, remote(&format!("{}.bin", i))), Vec::new()).unwrap();
        }
        assert_eq!(manager.outstanding(), 5);
        manager.shutdown();
        assert_eq!(accessor.object_count(), 5);
    }
}
