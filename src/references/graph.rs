//! Reference graph expansion
//!
//! Builds the ordered list of files a unit's harness must load. The graph is
//! built as an owned tree per file under test and flattened post-order, so a
//! dependency always precedes the files that reference it. Every file appears
//! at most once per unit; a reference back into a file already seen is
//! dropped, which is what breaks cycles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use super::markers::{self, Marker};
use super::types::{FilePosition, ReferencedFile};
use crate::common::paths::{extension_of, is_rooted, is_url, normalize, path_key, resolve_against};
use crate::common::pattern::PathFilter;
use crate::common::Result;
use crate::framework::{positions_of, FrameworkDefinition};
use crate::fs::FileSystem;
use crate::settings::{ReferenceDeclaration, RootReferencePathMode, SettingsScope};

/// Extensions picked up when a reference names a whole folder
pub const REFERENCE_EXTENSIONS: [&str; 6] = [".js", ".ts", ".tsx", ".jsx", ".coffee", ".mjs"];

const TEMPLATE_EXTENSIONS: [&str; 2] = [".html", ".htm"];

/// Prefix of files the pipeline generates next to the sources
pub const TEMP_FILE_PREFIX: &str = "_jsharness.";

/// Whether a file found by folder expansion should be referenced
pub fn is_reference_file(path: &Path) -> bool {
    let temp = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().to_lowercase().starts_with(TEMP_FILE_PREFIX));
    !temp
        && extension_of(path).is_some_and(|ext| REFERENCE_EXTENSIONS.contains(&ext.as_str()))
}

fn is_template_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext.as_str()))
}

/// Expands files under test into their full, ordered reference list
pub struct ReferenceGraphResolver {
    fs: Arc<dyn FileSystem>,
}

impl ReferenceGraphResolver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Produce the flattened reference list for one unit
    ///
    /// Order: framework scripts, then references declared in `scope`, then
    /// for each file under test its dependencies followed by the file itself.
    /// Missing references are logged and skipped; only an unreadable file
    /// under test fails the unit.
    pub fn expand(
        &self,
        files_under_test: &[PathBuf],
        scope: &SettingsScope,
        framework: Option<&dyn FrameworkDefinition>,
    ) -> Result<Vec<ReferencedFile>> {
        let mut walk = Walk {
            fs: self.fs.as_ref(),
            scope,
            framework,
            discovered: HashSet::new(),
            under_test: files_under_test.iter().map(|p| path_key(p)).collect(),
        };
        let mut out = Vec::new();

        if let Some(framework) = framework {
            for dep in framework.file_dependencies(scope) {
                if walk.discovered.insert(path_key(&dep)) {
                    let mut file = ReferencedFile::local(&normalize(&dep));
                    file.is_test_framework_file = true;
                    file.expand_reference_comments = false;
                    out.push(file);
                }
            }
        }

        for declaration in &scope.references {
            walk.declared(declaration, &mut out);
        }

        for path in files_under_test {
            let key = path_key(path);
            if let Some(existing) = out.iter_mut().find(|f| f.key() == key) {
                // Already pulled in as a dependency of an earlier file under test
                existing.is_file_under_test = true;
                continue;
            }
            walk.discovered.insert(key);

            let text = self.fs.read_text(path)?;
            let path = normalize(path);
            let mut file = ReferencedFile::local(&path);
            file.is_file_under_test = true;
            file.children = walk.children_of(&path, &text);
            file.flatten_into(&mut out);
        }

        let custom_pattern = compile_scope_pattern(scope);
        for file in out.iter_mut().filter(|f| f.is_file_under_test) {
            file.file_positions = self.positions(file, scope, framework, custom_pattern.as_ref());
        }

        tracing::debug!(
            files_under_test = files_under_test.len(),
            references = out.len(),
            "expanded reference graph"
        );
        Ok(out)
    }

    fn positions(
        &self,
        file: &ReferencedFile,
        scope: &SettingsScope,
        framework: Option<&dyn FrameworkDefinition>,
        custom_pattern: Option<&Regex>,
    ) -> Vec<FilePosition> {
        let Some(path) = file.local_path() else {
            return Vec::new();
        };
        let Ok(text) = self.fs.read_text(path) else {
            return Vec::new();
        };
        match framework {
            Some(framework) => framework.test_positions(&text, scope),
            None => custom_pattern
                .map(|regex| positions_of(regex, &text))
                .unwrap_or_default(),
        }
    }
}

fn compile_scope_pattern(scope: &SettingsScope) -> Option<Regex> {
    let pattern = scope.test_pattern.as_deref()?;
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern, "invalid TestPattern: {}", e);
            None
        }
    }
}

/// State for a single expansion; nothing survives between units
struct Walk<'a> {
    fs: &'a dyn FileSystem,
    scope: &'a SettingsScope,
    framework: Option<&'a dyn FrameworkDefinition>,
    discovered: HashSet<String>,
    under_test: HashSet<String>,
}

impl Walk<'_> {
    /// Add the files named by one settings-file reference
    ///
    /// Declared references are taken as-is; markers inside them are not followed.
    fn declared(&mut self, declaration: &ReferenceDeclaration, out: &mut Vec<ReferencedFile>) {
        let Some(path) = declaration.path.as_deref() else {
            return;
        };
        if is_url(path) {
            if self.discovered.insert(path.trim().to_lowercase()) {
                out.push(ReferencedFile::remote(path));
            }
            return;
        }

        let path = PathBuf::from(path);
        let candidates = if self.fs.is_dir(&path) {
            let filter = match PathFilter::new(&declaration.includes, &declaration.excludes) {
                Ok(filter) => filter,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping reference folder: {}", e);
                    return;
                }
            };
            let files = match self.fs.list_files(&path) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "cannot list reference folder: {}", e);
                    return;
                }
            };
            let templates = declaration.template_options.is_some();
            files
                .into_iter()
                .filter(|f| is_reference_file(f) || (templates && is_template_file(f)))
                .filter(|f| filter.accepts(&f.to_string_lossy()))
                .collect()
        } else if self.fs.is_file(&path) {
            vec![path]
        } else {
            tracing::warn!(path = %path.display(), "declared reference not found");
            return;
        };

        for file in candidates {
            let key = path_key(&file);
            if self.under_test.contains(&key) || !self.discovered.insert(key) {
                continue;
            }
            let mut node = ReferencedFile::local(&normalize(&file));
            node.expand_reference_comments = false;
            node.include_in_harness = declaration.include_in_test_harness;
            node.is_test_framework_file = declaration.is_test_framework_file;
            node.template = declaration.template_options.clone();
            out.push(node);
        }
    }

    /// Direct dependencies named by markers in `text`, each with its own subtree
    fn children_of(&mut self, parent: &Path, text: &str) -> Vec<ReferencedFile> {
        let dir = parent.parent().unwrap_or_else(|| Path::new(""));
        let mut children = Vec::new();

        for marker in markers::scan(text) {
            match marker {
                Marker::Template { path, options } => {
                    let resolved = self.resolve(dir, &path);
                    if !self.fs.is_file(&resolved) {
                        tracing::warn!(template = path, from = %parent.display(), "template not found");
                        continue;
                    }
                    if self.discovered.insert(path_key(&resolved)) {
                        let mut node = ReferencedFile::local(&resolved);
                        node.template = Some(options);
                        node.expand_reference_comments = false;
                        children.push(node);
                    }
                }
                Marker::Reference { path } => {
                    if self
                        .framework
                        .is_some_and(|framework| framework.is_framework_dependency(&path))
                    {
                        tracing::trace!(reference = path, "skipping framework file");
                        continue;
                    }
                    if is_url(&path) {
                        if self.discovered.insert(path.trim().to_lowercase()) {
                            children.push(ReferencedFile::remote(&path));
                        }
                        continue;
                    }

                    let resolved = self.resolve(dir, &path);
                    if self.fs.is_dir(&resolved) {
                        match self.fs.list_files(&resolved) {
                            Ok(files) => {
                                for file in files.iter().filter(|f| is_reference_file(f)) {
                                    children.extend(self.local(file));
                                }
                            }
                            Err(e) => tracing::warn!(reference = path, "cannot list folder: {}", e),
                        }
                    } else if self.fs.is_file(&resolved) {
                        children.extend(self.local(&resolved));
                    } else {
                        tracing::warn!(reference = path, from = %parent.display(), "referenced file not found");
                    }
                }
            }
        }
        children
    }

    /// A newly discovered local file with its subtree, or `None` if already seen
    fn local(&mut self, path: &Path) -> Option<ReferencedFile> {
        let path = normalize(path);
        if !self.discovered.insert(path_key(&path)) {
            return None;
        }
        let mut node = ReferencedFile::local(&path);
        match self.fs.read_text(&path) {
            Ok(text) => node.children = self.children_of(&path, &text),
            Err(e) => tracing::warn!(path = %path.display(), "cannot read reference: {}", e),
        }
        Some(node)
    }

    fn resolve(&self, dir: &Path, value: &str) -> PathBuf {
        if is_rooted(value)
            && self.scope.root_reference_path_mode() == RootReferencePathMode::SettingsFileDirectory
        {
            if let Some(settings_dir) = self.scope.settings_dir() {
                return resolve_against(settings_dir, value.trim_start_matches(['/', '\\']));
            }
        }
        resolve_against(dir, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::DeclaredFramework;
    use crate::fs::StdFileSystem;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    fn resolver() -> ReferenceGraphResolver {
        ReferenceGraphResolver::new(Arc::new(StdFileSystem))
    }

    fn names(files: &[ReferencedFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                if f.is_local {
                    Path::new(&f.path).file_name().unwrap().to_string_lossy().into_owned()
                } else {
                    f.path.clone()
                }
            })
            .collect()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let tmp = TempDir::new().unwrap();
        let test = write(tmp.path(), "test.js", "/// <reference path=\"lib/b.js\" />\n");
        write(tmp.path(), "lib/b.js", "/// <reference path=\"c.js\" />\n");
        write(tmp.path(), "lib/c.js", "");

        let files = resolver().expand(&[test], &SettingsScope::default(), None).unwrap();
        assert_eq!(names(&files), vec!["c.js", "b.js", "test.js"]);
        assert!(files[2].is_file_under_test);
        assert!(!files[0].is_file_under_test);
    }

    #[test]
    fn test_cycle_terminates_with_each_file_once() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.js", "/// <reference path=\"b.js\" />\n");
        write(tmp.path(), "b.js", "/// <reference path=\"a.js\" />\n");

        let files = resolver().expand(&[a], &SettingsScope::default(), None).unwrap();
        assert_eq!(names(&files), vec!["b.js", "a.js"]);
    }

    #[test]
    fn test_shared_dependency_listed_once() {
        let tmp = TempDir::new().unwrap();
        let t1 = write(tmp.path(), "t1.js", "/// <reference path=\"lib.js\" />\n");
        let t2 = write(tmp.path(), "t2.js", "/// <reference path=\"lib.js\" />\n");
        write(tmp.path(), "lib.js", "");

        let files = resolver().expand(&[t1, t2], &SettingsScope::default(), None).unwrap();
        assert_eq!(names(&files), vec!["lib.js", "t1.js", "t2.js"]);
    }

    #[test]
    fn test_file_under_test_referenced_by_another_is_marked_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let t1 = write(tmp.path(), "t1.js", "/// <reference path=\"t2.js\" />\n");
        let t2 = write(tmp.path(), "t2.js", "");

        let files = resolver().expand(&[t1, t2], &SettingsScope::default(), None).unwrap();
        assert_eq!(names(&files), vec!["t2.js", "t1.js"]);
        assert!(files.iter().all(|f| f.is_file_under_test));
    }

    #[test]
    fn test_missing_references_skipped_and_urls_kept() {
        let tmp = TempDir::new().unwrap();
        let test = write(
            tmp.path(),
            "test.js",
            "/// <reference path=\"missing.js\" />\n/// <reference path=\"https://cdn.example.com/x.js\" />\n",
        );

        let files = resolver().expand(&[test], &SettingsScope::default(), None).unwrap();
        assert_eq!(names(&files), vec!["https://cdn.example.com/x.js", "test.js"]);
        assert!(!files[0].is_local);
    }

    #[test]
    fn test_unreadable_file_under_test_fails() {
        let tmp = TempDir::new().unwrap();
        let result = resolver().expand(&[tmp.path().join("nope.js")], &SettingsScope::default(), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_framework_and_declared_references_come_first() {
        let tmp = TempDir::new().unwrap();
        let qunit = write(tmp.path(), "fw/qunit.js", "");
        write(tmp.path(), "vendor/jquery.js", "");
        write(tmp.path(), "vendor/jquery.min.js", "");
        write(tmp.path(), "vendor/_jsharness.tmp.js", "");
        write(tmp.path(), "vendor/readme.txt", "");
        let test = write(
            tmp.path(),
            "test.js",
            "/// <reference path=\"../elsewhere/qunit.js\" />\n/// <reference path=\"vendor/jquery.js\" />\n",
        );

        let declaration: ReferenceDeclaration = serde_json::from_value(serde_json::json!({
            "Path": tmp.path().join("vendor").to_string_lossy(),
            "Excludes": ["*.min.js"]
        }))
        .unwrap();
        let scope = SettingsScope {
            references: vec![declaration],
            ..Default::default()
        };
        let framework = DeclaredFramework::new("qunit").with_dependencies(vec![qunit]);

        let files = resolver().expand(&[test], &scope, Some(&framework)).unwrap();
        assert_eq!(names(&files), vec!["qunit.js", "jquery.js", "test.js"]);
        assert!(files[0].is_test_framework_file);
        assert!(!files[1].expand_reference_comments);
    }

    #[test]
    fn test_rooted_reference_uses_settings_directory() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "shared/util.js", "");
        let test = write(tmp.path(), "specs/deep/test.js", "/// <reference path=\"/shared/util.js\" />\n");

        let scope = SettingsScope {
            root_reference_path_mode: Some(RootReferencePathMode::SettingsFileDirectory),
            settings_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let files = resolver().expand(&[test], &scope, None).unwrap();
        assert_eq!(names(&files), vec!["util.js", "test.js"]);
    }

    #[test]
    fn test_positions_from_scope_pattern() {
        let tmp = TempDir::new().unwrap();
        let test = write(tmp.path(), "test.js", "describe('x');\n  it('a');\n  it('b');\n");
        let scope = SettingsScope {
            test_pattern: Some(r"it\(".to_string()),
            ..Default::default()
        };

        let files = resolver().expand(&[test], &scope, None).unwrap();
        assert_eq!(
            files[0].file_positions,
            vec![FilePosition { line: 2, column: 3 }, FilePosition { line: 3, column: 3 }]
        );
    }
}
