use std::future::Future;
use tokio::runtime::{Builder, Runtime};

use unipath_common::{Error, Result, Scheme};

/// Tokio runtime owned by one S3 accessor.
///
/// Blocking accessor calls drive the rust-s3 futures on this runtime. When the
/// caller is itself inside a Tokio context the future runs on a scoped helper
/// thread, since `block_on` may not nest.
pub(crate) struct ObjectRuntime {
    scheme: Scheme,
    runtime: Option<Runtime>,
}

impl ObjectRuntime {
    pub(crate) fn new(scheme: Scheme) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("unipath-{}", scheme))
            .enable_all()
            .build()
            .map_err(|e| Error::backend(scheme, format!("failed to create runtime: {}", e)))?;
        Ok(Self {
            scheme,
            runtime: Some(runtime),
        })
    }

    /// Run an async operation to completion from synchronous code.
    pub(crate) fn block_on<F, Fut, T>(&self, make_future: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::backend(self.scheme, "accessor runtime is shut down"))?;

        if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::scope(|s| {
                s.spawn(|| runtime.block_on(make_future()))
                    .join()
                    .map_err(|_| Error::Internal("S3 helper thread panicked".into()))?
            })
        } else {
            runtime.block_on(make_future())
        }
    }
}

impl Drop for ObjectRuntime {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async contexts.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
