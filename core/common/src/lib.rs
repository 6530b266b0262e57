//! Common utilities and types shared across unipath crates.
//!
//! This crate provides the error type, storage scheme and flavor tags, and
//! the pure path representation every other crate builds on.

pub mod error;
pub mod pathspec;
pub mod types;

pub use error::{Error, Result};
pub use pathspec::PathSpec;
pub use types::{Flavor, Scheme, Secret};
