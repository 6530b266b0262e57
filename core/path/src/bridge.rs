//! Sync/async bridge.
//!
//! Blocking path operations run on the blocking pool of a Tokio runtime the
//! bridge owns; the caller gets a future that resolves with the operation's
//! result. The caller's own runtime threads never block on storage I/O.

use once_cell::sync::OnceCell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use unipath_common::{Error, Result};
use unipath_storage::{AccessorRegistry, WorkerSettings};

static GLOBAL: OnceCell<Bridge> = OnceCell::new();

/// Bounded pool of blocking threads that turns blocking calls into futures.
pub struct Bridge {
    runtime: Option<Runtime>,
    workers: usize,
    /// Running plus waiting calls allowed at once; `None` when unbounded.
    permits: Option<Arc<Semaphore>>,
    in_flight: Arc<AtomicUsize>,
}

impl Bridge {
    /// Start a bridge running up to `workers` calls at once. With
    /// `queue_depth` set, submissions beyond that many waiting calls are
    /// rejected with [`Error::Saturated`].
    ///
    /// # Errors
    /// - `Internal` if the runtime cannot be started
    pub fn new(workers: usize, queue_depth: Option<usize>) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("unipath-bridge")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("failed to start bridge runtime: {}", e)))?;
        debug!(workers, ?queue_depth, "Bridge started");
        Ok(Self {
            runtime: Some(runtime),
            workers,
            permits: queue_depth.map(|depth| Arc::new(Semaphore::new(workers + depth))),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn from_settings(settings: &WorkerSettings) -> Result<Self> {
        Self::new(settings.resolved_workers(), settings.queue_depth)
    }

    /// Process-wide bridge, sized from the global registry's settings on first use.
    pub fn global() -> Result<&'static Bridge> {
        GLOBAL.get_or_try_init(|| {
            let workers = AccessorRegistry::global()
                .settings()
                .map(|s| s.workers)
                .unwrap_or_default();
            Self::from_settings(&workers)
        })
    }

    /// Number of calls that run at once.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Calls waiting for a worker.
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::Acquire).saturating_sub(self.workers)
    }

    /// Queue `f` and return a handle to its result.
    ///
    /// # Errors
    /// - `Saturated` if the queue is bounded and full
    /// - `Internal` if the bridge has shut down
    pub fn submit<T, F>(&self, f: F) -> Result<BridgeTask<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("bridge is shut down".into()))?;
        let permit = match &self.permits {
            Some(permits) => Some(Arc::clone(permits).try_acquire_owned().map_err(|_| {
                Error::Saturated(format!("{} calls already waiting", self.pending()))
            })?),
            None => None,
        };

        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);
        let handle = runtime.spawn_blocking(move || {
            let _permit = permit;
            let outcome = catch_unwind(AssertUnwindSafe(f));
            in_flight.fetch_sub(1, Ordering::AcqRel);
            outcome
        });
        Ok(BridgeTask { handle })
    }

    /// Run `f` on the pool and wait for it without blocking the caller's thread.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit(f)?.await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Pending result of a bridged call.
pub struct BridgeTask<T> {
    handle: JoinHandle<thread::Result<Result<T>>>,
}

impl<T> Future for BridgeTask<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal("bridged call panicked".into())),
            Err(_) => Err(Error::Internal("bridge dropped the call".into())),
        })
    }
}
