//! Common types used throughout unipath.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Storage backend a path lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scheme {
    /// Local filesystem.
    #[serde(rename = "file")]
    Local,
    /// In-process object store.
    #[serde(rename = "mem")]
    Memory,
    /// Amazon S3.
    #[serde(rename = "s3")]
    S3,
    /// Generic S3-compatible endpoint.
    #[serde(rename = "s3c")]
    S3Compat,
    /// MinIO server.
    #[serde(rename = "minio")]
    Minio,
    /// Cloudflare R2.
    #[serde(rename = "r2")]
    R2,
    /// Wasabi hot storage.
    #[serde(rename = "wasabi")]
    Wasabi,
}

impl Scheme {
    /// Every known scheme.
    pub const ALL: [Scheme; 7] = [
        Scheme::Local,
        Scheme::Memory,
        Scheme::S3,
        Scheme::S3Compat,
        Scheme::Minio,
        Scheme::R2,
        Scheme::Wasabi,
    ];

    /// Remote schemes served by an S3-protocol client.
    pub const S3_FAMILY: [Scheme; 5] = [
        Scheme::S3,
        Scheme::S3Compat,
        Scheme::Minio,
        Scheme::R2,
        Scheme::Wasabi,
    ];

    /// URI prefix (the part before `://`).
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Local => "file",
            Scheme::Memory => "mem",
            Scheme::S3 => "s3",
            Scheme::S3Compat => "s3c",
            Scheme::Minio => "minio",
            Scheme::R2 => "r2",
            Scheme::Wasabi => "wasabi",
        }
    }

    /// Human readable provider name.
    pub fn provider(&self) -> &'static str {
        match self {
            Scheme::Local => "Local",
            Scheme::Memory => "Memory",
            Scheme::S3 => "AWS",
            Scheme::S3Compat => "S3Compatible",
            Scheme::Minio => "MinIO",
            Scheme::R2 => "CloudFlare",
            Scheme::Wasabi => "Wasabi",
        }
    }

    /// Whether paths of this scheme are bucket/key addressed.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Scheme::Local)
    }

    /// Whether this scheme is served by the S3 protocol.
    pub fn is_s3_family(&self) -> bool {
        Self::S3_FAMILY.contains(self)
    }

    /// Look up a scheme by URI prefix, accepting a few common aliases.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "file" | "local" => Some(Scheme::Local),
            "mem" | "memory" => Some(Scheme::Memory),
            "s3" | "s3a" | "aws" => Some(Scheme::S3),
            "s3c" | "s3compat" | "s3_compat" => Some(Scheme::S3Compat),
            "minio" => Some(Scheme::Minio),
            "r2" => Some(Scheme::R2),
            "wasabi" => Some(Scheme::Wasabi),
            _ => None,
        }
    }

    /// Split `text` into its scheme and the remainder after `://`.
    ///
    /// Returns `None` when `text` carries no URI prefix. Single-letter
    /// prefixes are never schemes so Windows drives such as `C://x` pass through.
    pub fn split_uri(text: &str) -> Option<(&str, &str)> {
        let idx = text.find("://")?;
        let prefix = &text[..idx];
        let valid = prefix.len() > 1
            && prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'));
        if valid {
            Some((prefix, &text[idx + 3..]))
        } else {
            None
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Scheme {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_prefix(s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("Unknown scheme '{}'", s)))
    }
}

/// Path segment rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// `/`-separated, case-sensitive.
    Posix,
    /// `\` or `/` separated, drive anchors, case-insensitive.
    Windows,
}

impl Flavor {
    /// The flavor native to the running host.
    pub fn host() -> Self {
        if cfg!(windows) {
            Flavor::Windows
        } else {
            Flavor::Posix
        }
    }

    /// Whether I/O-capable paths of this flavor can be created on this host.
    pub fn is_supported(&self) -> bool {
        *self == Self::host()
    }

    /// Separator used when rendering.
    pub fn separator(&self) -> char {
        match self {
            Flavor::Posix => '/',
            Flavor::Windows => '\\',
        }
    }

    /// Whether `c` separates segments under this flavor.
    pub fn is_separator(&self, c: char) -> bool {
        match self {
            Flavor::Posix => c == '/',
            Flavor::Windows => c == '/' || c == '\\',
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Posix => f.write_str("posix"),
            Flavor::Windows => f.write_str("windows"),
        }
    }
}

/// Credential text that zeroizes on drop and never prints.
#[derive(Clone, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} bytes])", self.0.len())
    }
}
