//! Lazy glob expansion over any accessor.

use globset::{GlobBuilder, GlobMatcher};
use std::vec;
use tracing::trace;

use crate::path::UniPath;
use unipath_common::{Error, Flavor, Result, Scheme};

fn is_literal(segment: &str) -> bool {
    !segment.contains(['*', '?', '[', ']', '{', '}'])
}

/// Glob pattern anchored at a base path.
///
/// Nothing is listed until the first item is pulled from [`Glob::iter`].
/// Every call to `iter` starts a fresh expansion.
#[derive(Debug, Clone)]
pub struct Glob {
    base: UniPath,
    pattern: String,
}

impl Glob {
    pub(crate) fn new(base: UniPath, pattern: &str) -> Self {
        Self {
            base,
            pattern: pattern.to_string(),
        }
    }

    pub fn base(&self) -> &UniPath {
        &self.base
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Start a new lazy expansion.
    pub fn iter(&self) -> GlobIter {
        GlobIter {
            glob: self.clone(),
            state: State::Pending,
        }
    }

    /// Expand eagerly, failing on the first error.
    pub fn paths(&self) -> Result<Vec<UniPath>> {
        self.iter().collect()
    }

    fn matcher(&self, pattern: &str) -> Result<GlobMatcher> {
        let case_insensitive =
            self.base.scheme() == Scheme::Local && self.base.flavor() == Flavor::Windows;
        GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(case_insensitive)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|e| Error::InvalidArgument(format!("Invalid glob '{}': {}", self.pattern, e)))
    }

    fn expand(&self) -> Result<Vec<UniPath>> {
        let segments: Vec<&str> = self
            .pattern
            .split(|c: char| self.base.flavor().is_separator(c))
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if segments.is_empty() {
            return Err(Error::InvalidArgument("Empty glob pattern".into()));
        }

        let literal = segments.iter().take_while(|s| is_literal(s)).count();
        let mut start = self.base.clone();
        for segment in &segments[..literal] {
            start = start.join(segment);
        }

        let rest = &segments[literal..];
        if rest.is_empty() {
            return Ok(if start.exists()? { vec![start] } else { Vec::new() });
        }
        if !start.is_dir()? {
            return Ok(Vec::new());
        }

        let remainder = rest.join("/");
        let matcher = self.matcher(&remainder)?;
        let accessor = start.accessor()?;
        let entries = if rest.len() == 1 && !remainder.contains("**") {
            accessor.list(start.as_ref())?
        } else {
            accessor.walk(start.as_ref())?
        };
        trace!(start = %start, pattern = %remainder, candidates = entries.len(), "Expanding glob");

        let mut matches = Vec::new();
        for meta in entries {
            let relative = meta.path.relative_to(start.as_ref())?;
            if matcher.is_match(relative.segments().join("/")) {
                matches.push(start.derive(meta.path));
            }
        }
        matches.sort_by_key(|path| path.as_posix());
        Ok(matches)
    }
}

impl<'a> IntoIterator for &'a Glob {
    type Item = Result<UniPath>;
    type IntoIter = GlobIter;

    fn into_iter(self) -> GlobIter {
        self.iter()
    }
}

enum State {
    Pending,
    Ready(vec::IntoIter<UniPath>),
    Done,
}

/// Iterator over glob matches, in path order.
pub struct GlobIter {
    glob: Glob,
    state: State,
}

impl Iterator for GlobIter {
    type Item = Result<UniPath>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                State::Pending => match self.glob.expand() {
                    Ok(paths) => self.state = State::Ready(paths.into_iter()),
                    Err(e) => {
                        self.state = State::Done;
                        return Some(Err(e));
                    }
                },
                State::Ready(paths) => {
                    let next = paths.next();
                    if next.is_none() {
                        self.state = State::Done;
                    }
                    return next.map(Ok);
                }
                State::Done => return None,
            }
        }
    }
}
