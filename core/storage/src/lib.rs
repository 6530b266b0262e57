//! Storage accessors for unipath.
//!
//! This crate provides the blocking [`Accessor`] trait implemented by every
//! storage backend (local filesystem, in-memory object store, S3-family
//! object stores), the settings resolver that produces credential bundles,
//! the registry that caches one accessor per scheme, and the transfer manager
//! used for bulk uploads and downloads.
//!
//! # Design Principles
//! - One accessor per scheme: built lazily, shared, invalidated on reconfigure
//! - Blocking operations: async callers go through the worker-pool bridge
//! - Unified error semantics: every backend maps onto `unipath_common::Error`

pub mod accessor;
pub mod local;
pub mod memory;
pub mod registry;
pub mod s3;
pub mod settings;
pub mod transfer;

pub use accessor::{Accessor, Metadata, Progress, ReadStream, WriteStream};
pub use local::LocalAccessor;
pub use memory::MemoryAccessor;
pub use registry::{accessor_factory, AccessorFactory, AccessorRegistry};
pub use crate::s3::S3Accessor;
pub use settings::{BundleUpdate, CredentialBundle, Settings, WorkerSettings};
pub use transfer::{TransferDirection, TransferManager, TransferRequest, TransferSubscriber};
