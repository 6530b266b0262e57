//! Pure, syntactic path representation.
//!
//! A `PathSpec` never touches storage. It knows its scheme, its flavor and
//! its segments, and implements the path algebra (join, parent, name,
//! suffix, relative-to) the same way for local and remote locations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::types::{Flavor, Scheme};
use crate::{Error, Result};

/// Syntactic path: scheme + flavor + anchor + segments.
///
/// Remote paths are anchored at `<prefix>://`; their first segment is the
/// bucket and the remaining segments form the object key. A remote
/// `PathSpec` with an empty anchor is a relative key fragment, produced by
/// [`PathSpec::relative_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    scheme: Scheme,
    flavor: Flavor,
    anchor: String,
    segments: Vec<String>,
}

impl PathSpec {
    /// Parse a path or URI using the host flavor.
    ///
    /// # Errors
    /// - `InvalidArgument` for a URI whose scheme is not known
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_flavor(text, Flavor::host())
    }

    /// Parse a path or URI with an explicit flavor.
    ///
    /// Any flavor can be parsed on any host; only I/O on a foreign flavor fails.
    pub fn parse_with_flavor(text: &str, flavor: Flavor) -> Result<Self> {
        if let Some((prefix, rest)) = Scheme::split_uri(text) {
            let scheme = Scheme::from_prefix(prefix).ok_or_else(|| {
                Error::InvalidArgument(format!("Unsupported scheme '{}' in '{}'", prefix, text))
            })?;
            return Ok(match scheme {
                Scheme::Local => Self::parse_local(rest, flavor),
                remote => Self::remote(remote, flavor, rest),
            });
        }
        Ok(Self::parse_local(text, flavor))
    }

    /// Root of a scheme: `/` locally, `<prefix>://` remotely.
    pub fn root(scheme: Scheme) -> Self {
        let flavor = Flavor::host();
        let anchor = if scheme.is_remote() {
            format!("{}://", scheme.prefix())
        } else {
            flavor.separator().to_string()
        };
        Self {
            scheme,
            flavor,
            anchor,
            segments: Vec::new(),
        }
    }

    /// Build a local path from a `std::path::Path`.
    pub fn from_std_path(path: &Path) -> Self {
        Self::parse_local(&path.to_string_lossy(), Flavor::host())
    }

    fn parse_local(text: &str, flavor: Flavor) -> Self {
        let (anchor, rest) = split_anchor(text, flavor);
        Self {
            scheme: Scheme::Local,
            flavor,
            anchor,
            segments: split_segments(rest, flavor),
        }
    }

    fn remote(scheme: Scheme, flavor: Flavor, rest: &str) -> Self {
        Self {
            scheme,
            flavor,
            anchor: format!("{}://", scheme.prefix()),
            segments: split_segments(rest, flavor),
        }
    }

    /// Storage scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Segment rules.
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Anchor (root, drive, UNC share or `<prefix>://`); empty when relative.
    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    /// Segments after the anchor.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Anchor (when present) followed by the segments.
    pub fn parts(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(self.segments.len() + 1);
        if !self.anchor.is_empty() {
            parts.push(self.anchor.clone());
        }
        parts.extend(self.segments.iter().cloned());
        parts
    }

    /// Whether the path is fully qualified.
    pub fn is_absolute(&self) -> bool {
        if self.scheme.is_remote() {
            return !self.anchor.is_empty();
        }
        match self.flavor {
            Flavor::Posix => self.anchor == "/",
            Flavor::Windows => self.anchor.len() > 1 && self.anchor.ends_with('\\'),
        }
    }

    /// Whether this is an anchor with no segments.
    pub fn is_root(&self) -> bool {
        !self.anchor.is_empty() && self.segments.is_empty()
    }

    /// Final segment.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Final extension of the name, including the dot.
    pub fn suffix(&self) -> Option<&str> {
        let name = self.name()?;
        match name.rfind('.') {
            Some(i) if i > 0 && i + 1 < name.len() => Some(&name[i..]),
            _ => None,
        }
    }

    /// All extensions of the name (`a.tar.gz` -> `[".tar", ".gz"]`).
    pub fn suffixes(&self) -> Vec<String> {
        let Some(name) = self.name() else {
            return Vec::new();
        };
        if name.ends_with('.') {
            return Vec::new();
        }
        name.trim_start_matches('.')
            .split('.')
            .skip(1)
            .map(|s| format!(".{}", s))
            .collect()
    }

    /// Name without its final suffix.
    pub fn stem(&self) -> Option<&str> {
        let name = self.name()?;
        match self.suffix() {
            Some(suffix) => Some(&name[..name.len() - suffix.len()]),
            None => Some(name),
        }
    }

    /// Logical parent. The parent of an anchor is the anchor itself.
    pub fn parent(&self) -> Self {
        let mut out = self.clone();
        out.segments.pop();
        out
    }

    /// Every ancestor, nearest first.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::with_capacity(self.segments.len());
        let mut current = self.clone();
        while !current.segments.is_empty() {
            current = current.parent();
            out.push(current.clone());
        }
        out
    }

    /// Append a fragment.
    ///
    /// A fragment carrying a known URI prefix replaces the path. A fragment
    /// with its own anchor replaces the anchor and segments (a rooted
    /// fragment on a remote path restarts at the bucket).
    pub fn join(&self, fragment: &str) -> Self {
        if let Some((prefix, _)) = Scheme::split_uri(fragment) {
            if Scheme::from_prefix(prefix).is_some() {
                if let Ok(path) = Self::parse_with_flavor(fragment, self.flavor) {
                    return path;
                }
            }
        }

        let mut out = self.clone();
        if self.scheme.is_remote() {
            if fragment.starts_with(|c: char| self.flavor.is_separator(c)) && self.is_absolute() {
                out.segments.truncate(1);
            }
            out.segments.extend(split_segments(fragment, self.flavor));
            return out;
        }

        let (anchor, rest) = split_anchor(fragment, self.flavor);
        if !anchor.is_empty() {
            let keeps_drive = self.flavor == Flavor::Windows
                && anchor == "\\"
                && self.anchor.len() >= 2
                && self.anchor.as_bytes()[1] == b':';
            out.anchor = if keeps_drive {
                format!("{}\\", &self.anchor[..2])
            } else {
                anchor
            };
            out.segments.clear();
        }
        out.segments.extend(split_segments(rest, self.flavor));
        out
    }

    /// Append several fragments in order.
    pub fn join_all<'a>(&self, fragments: impl IntoIterator<Item = &'a str>) -> Self {
        fragments
            .into_iter()
            .fold(self.clone(), |acc, fragment| acc.join(fragment))
    }

    /// Replace the final segment.
    ///
    /// # Errors
    /// - `InvalidArgument` if the path has no name or `name` is not a single segment
    pub fn with_name(&self, name: &str) -> Result<Self> {
        if self.segments.is_empty() {
            return Err(Error::InvalidArgument(format!("{} has an empty name", self)));
        }
        if name.is_empty() || name == "." || name.contains(|c: char| self.flavor.is_separator(c)) {
            return Err(Error::InvalidArgument(format!("Invalid name '{}'", name)));
        }
        let mut out = self.clone();
        if let Some(last) = out.segments.last_mut() {
            *last = name.to_string();
        }
        Ok(out)
    }

    /// Replace the final suffix (empty `suffix` removes it).
    pub fn with_suffix(&self, suffix: &str) -> Result<Self> {
        if !suffix.is_empty()
            && (!suffix.starts_with('.')
                || suffix == "."
                || suffix.contains(|c: char| self.flavor.is_separator(c)))
        {
            return Err(Error::InvalidArgument(format!("Invalid suffix '{}'", suffix)));
        }
        let stem = self
            .stem()
            .ok_or_else(|| Error::InvalidArgument(format!("{} has an empty name", self)))?;
        self.with_name(&format!("{}{}", stem, suffix))
    }

    /// Express this path relative to `base`.
    ///
    /// # Errors
    /// - `InvalidArgument` if `base` is not an ancestor of (or equal to) this path
    pub fn relative_to(&self, base: &PathSpec) -> Result<Self> {
        let not_relative =
            || Error::InvalidArgument(format!("{} is not relative to {}", self, base));
        if self.scheme != base.scheme || !self.same_text(&self.anchor, &base.anchor) {
            return Err(not_relative());
        }
        if base.segments.len() > self.segments.len() {
            return Err(not_relative());
        }
        let prefix_matches = base
            .segments
            .iter()
            .zip(&self.segments)
            .all(|(a, b)| self.same_text(a, b));
        if !prefix_matches {
            return Err(not_relative());
        }
        Ok(Self {
            scheme: self.scheme,
            flavor: self.flavor,
            anchor: String::new(),
            segments: self.segments[base.segments.len()..].to_vec(),
        })
    }

    /// Bucket of an absolute remote path.
    pub fn bucket(&self) -> Option<&str> {
        if self.scheme.is_remote() && self.is_absolute() {
            self.segments.first().map(|s| s.as_str())
        } else {
            None
        }
    }

    /// Object key below the bucket (empty for the bucket itself).
    pub fn key(&self) -> String {
        if self.scheme.is_remote() && self.is_absolute() {
            self.segments.iter().skip(1).cloned().collect::<Vec<_>>().join("/")
        } else {
            self.segments.join("/")
        }
    }

    /// Rendering with forward slashes.
    pub fn as_posix(&self) -> String {
        match (self.scheme, self.flavor) {
            (Scheme::Local, Flavor::Windows) => self.to_string().replace('\\', "/"),
            _ => self.to_string(),
        }
    }

    /// Native filesystem path, for local paths only.
    pub fn to_std_path(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::Local => Some(PathBuf::from(self.to_string())),
            _ => None,
        }
    }

    fn same_text(&self, a: &str, b: &str) -> bool {
        if self.folds_case() {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn folds_case(&self) -> bool {
        self.scheme == Scheme::Local && self.flavor == Flavor::Windows
    }

    fn fold(&self, text: &str) -> String {
        if self.folds_case() {
            text.to_ascii_lowercase()
        } else {
            text.to_string()
        }
    }
}

fn split_segments(text: &str, flavor: Flavor) -> Vec<String> {
    text.split(|c: char| flavor.is_separator(c))
        .filter(|s| !s.is_empty() && *s != ".")
        .map(String::from)
        .collect()
}

fn split_anchor(text: &str, flavor: Flavor) -> (String, &str) {
    let is_sep = |c: char| flavor.is_separator(c);
    match flavor {
        Flavor::Posix => {
            if text.starts_with('/') {
                ("/".to_string(), text.trim_start_matches('/'))
            } else {
                (String::new(), text)
            }
        }
        Flavor::Windows => {
            let mut chars = text.chars();
            let (first, second) = (chars.next(), chars.next());

            // UNC share: \\server\share\rest
            if first.is_some_and(is_sep) && second.is_some_and(is_sep) {
                let mut parts = text[2..].splitn(3, is_sep);
                let server = parts.next().unwrap_or("");
                let share = parts.next().unwrap_or("");
                if !server.is_empty() && !share.is_empty() {
                    let rest = parts.next().unwrap_or("");
                    return (format!("\\\\{}\\{}\\", server, share), rest);
                }
            }

            let bytes = text.as_bytes();
            if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                let drive = &text[..2];
                let rest = &text[2..];
                if rest.starts_with(is_sep) {
                    return (format!("{}\\", drive), rest.trim_start_matches(is_sep));
                }
                return (drive.to_string(), rest);
            }

            if text.starts_with(is_sep) {
                return ("\\".to_string(), text.trim_start_matches(is_sep));
            }
            (String::new(), text)
        }
    }
}

impl PartialEq for PathSpec {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.flavor == other.flavor
            && self.same_text(&self.anchor, &other.anchor)
            && self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| self.same_text(a, b))
    }
}

impl Eq for PathSpec {}

impl Hash for PathSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.flavor.hash(state);
        self.fold(&self.anchor).hash(state);
        for segment in &self.segments {
            self.fold(segment).hash(state);
        }
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme.is_remote() {
            return write!(f, "{}{}", self.anchor, self.segments.join("/"));
        }
        if self.anchor.is_empty() && self.segments.is_empty() {
            return f.write_str(".");
        }
        let sep = self.flavor.separator().to_string();
        write!(f, "{}{}", self.anchor, self.segments.join(&sep))
    }
}
