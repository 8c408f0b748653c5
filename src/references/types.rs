//! Reference graph nodes

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::common::paths::path_key;
use crate::settings::TemplateOptions;

/// 1-based location of a test declaration in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    pub line: u32,
    pub column: u32,
}

/// One dependency of a unit, or one of its files under test
///
/// Equality and hashing only consider the normalized path.
#[derive(Debug, Clone)]
pub struct ReferencedFile {
    /// Absolute file path, or a URL for remote references
    pub path: String,
    pub is_local: bool,
    /// Output of the batch compiler for this file, when it has one
    pub generated_path: Option<PathBuf>,
    /// Module path used by an AMD loader
    pub amd_path: Option<String>,
    pub is_file_under_test: bool,
    pub is_test_framework_file: bool,
    pub include_in_harness: bool,
    /// Set for HTML template references
    pub template: Option<TemplateOptions>,
    /// Whether reference markers in this file are followed
    pub expand_reference_comments: bool,
    /// Test declaration positions, indexed by arrival order of test results
    pub file_positions: Vec<FilePosition>,
    /// Files this file references; empty once the graph is flattened
    pub children: Vec<ReferencedFile>,
}

impl ReferencedFile {
    pub fn local(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            is_local: true,
            generated_path: None,
            amd_path: None,
            is_file_under_test: false,
            is_test_framework_file: false,
            include_in_harness: true,
            template: None,
            expand_reference_comments: true,
            file_positions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn remote(url: &str) -> Self {
        Self {
            path: url.trim().to_string(),
            is_local: false,
            expand_reference_comments: false,
            ..Self::local(Path::new(""))
        }
    }

    /// De-duplication key
    pub fn key(&self) -> String {
        if self.is_local {
            path_key(Path::new(&self.path))
        } else {
            self.path.to_lowercase()
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.is_local.then(|| Path::new(self.path.as_str()))
    }

    /// The file the harness should actually load
    pub fn effective_path(&self) -> PathBuf {
        self.generated_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.path))
    }

    /// Flatten into `out`, children before the file that references them
    pub fn flatten_into(mut self, out: &mut Vec<ReferencedFile>) {
        for child in std::mem::take(&mut self.children) {
            child.flatten_into(out);
        }
        out.push(self);
    }
}

impl PartialEq for ReferencedFile {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ReferencedFile {}

impl Hash for ReferencedFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_normalized_path() {
        let a = ReferencedFile::local(Path::new("/Proj/Lib/A.js"));
        let mut b = ReferencedFile::local(Path::new("/proj/lib/../lib/a.js"));
        b.is_file_under_test = true;
        assert_eq!(a, b);
        assert_ne!(a, ReferencedFile::local(Path::new("/proj/lib/b.js")));
    }

    #[test]
    fn test_flatten_is_post_order() {
        let mut root = ReferencedFile::local(Path::new("/a.js"));
        let mut mid = ReferencedFile::local(Path::new("/b.js"));
        mid.children.push(ReferencedFile::local(Path::new("/c.js")));
        root.children.push(mid);
        root.children.push(ReferencedFile::remote("http://x/d.js"));

        let mut out = Vec::new();
        root.flatten_into(&mut out);
        let paths: Vec<_> = out.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/c.js", "/b.js", "http://x/d.js", "/a.js"]);
        assert!(out.iter().all(|f| f.children.is_empty()));
    }
}
