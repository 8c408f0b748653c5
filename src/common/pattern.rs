//! Wildcard path patterns
//!
//! Include/exclude filters are glob patterns: `*` matches any run of
//! characters, separators included, `?` one character and `[...]` a
//! character class. Backslashes in patterns and candidate paths are turned
//! into forward slashes and matching ignores case, so results do not depend
//! on path case or separator style.

use glob::{MatchOptions, Pattern};

use super::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled wildcard pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: Pattern,
}

impl PathPattern {
    /// Compile a wildcard pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = Pattern::new(&normalize(pattern))
            .map_err(|e| Error::Config(format!("Invalid path pattern '{}': {}", pattern, e)))?;
        Ok(Self { pattern: compiled })
    }

    /// Whether the given path matches the pattern
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches_with(&normalize(path), MATCH_OPTIONS)
    }
}

fn normalize(value: &str) -> String {
    value.replace('\\', "/")
}

/// A pair of include and exclude pattern lists
///
/// A path passes when it matches at least one include (or no includes are
/// declared) and matches no exclude.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    includes: Vec<PathPattern>,
    excludes: Vec<PathPattern>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self> {
        Ok(Self {
            includes: compile_all(includes)?,
            excludes: compile_all(excludes)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    pub fn accepts(&self, path: &str) -> bool {
        let included = self.includes.is_empty() || self.includes.iter().any(|p| p.matches(path));
        included && !self.excludes.iter().any(|p| p.matches(path))
    }
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathPattern>> {
    patterns
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .map(PathPattern::new)
        .collect()
}
