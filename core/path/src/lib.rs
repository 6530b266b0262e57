//! Uniform paths over local disk and object storage.
//!
//! [`UniPath`] wraps a pure [`PathSpec`] and resolves the accessor for its
//! scheme through an [`AccessorRegistry`] on every I/O call. Blocking methods
//! have `async_*` counterparts that run on the [`Bridge`] worker pool.
//!
//! ```no_run
//! use unipath::UniPath;
//!
//! # fn main() -> unipath::Result<()> {
//! let logs = UniPath::new("s3://bucket/logs")?;
//! for entry in logs.glob("*.txt").iter() {
//!     println!("{}", entry?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bridge;
mod bridged;
pub mod glob;
pub mod path;
pub mod stream;

pub use batch::{BatchReport, BatchSource, TransferEntry, TransferFailure, TransferOptions};
pub use bridge::{Bridge, BridgeTask};
pub use glob::{Glob, GlobIter};
pub use path::{Capability, DownloadTarget, PathLike, UniPath};
pub use stream::{ObjectReader, ObjectWriter};

pub use unipath_common::{Error, Flavor, PathSpec, Result, Scheme, Secret};
pub use unipath_storage::{
    Accessor, AccessorRegistry, BundleUpdate, CredentialBundle, Metadata, Settings,
    TransferDirection, TransferRequest, TransferSubscriber, WorkerSettings,
};
