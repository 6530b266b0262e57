//! S3-family accessors (AWS S3, generic S3-compatible, MinIO, R2, Wasabi).
//!
//! Every scheme of the family shares one implementation; they differ only in
//! the credential bundle (endpoint, region, addressing style) they are built from.

mod accessor;
mod runtime;

pub use accessor::S3Accessor;

use std::sync::Arc;

use crate::accessor::Accessor;
use crate::settings::CredentialBundle;
use unipath_common::{Result, Scheme};

/// Build an S3-family accessor for `scheme` from its credential bundle.
pub fn create_s3_accessor(scheme: Scheme, bundle: &CredentialBundle) -> Result<Arc<dyn Accessor>> {
    Ok(Arc::new(S3Accessor::new(scheme, bundle)?))
}
