//! Test file discovery
//!
//! Paths given to a run are either all settings files, in which case each
//! file's `Tests` declarations name the tests, or a mix of test files and
//! directories that are searched recursively.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::options::TestingMode;
use super::planner::DiscoveredFile;
use crate::common::paths::{normalize, path_key};
use crate::common::pattern::PathFilter;
use crate::common::{Error, RunError, RunErrorKind};
use crate::fs::FileSystem;
use crate::references::TEMP_FILE_PREFIX;
use crate::settings::{SettingsEnvironments, SettingsResolver, SettingsScope, TestPathDeclaration, SETTINGS_FILE_NAME};

/// Discovered files plus per-path failures
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    pub errors: Vec<RunError>,
}

/// Finds test files and the scope governing each one
pub struct TestDiscovery<'a> {
    fs: &'a dyn FileSystem,
    settings: &'a SettingsResolver,
    mode: TestingMode,
    environments: Option<&'a SettingsEnvironments>,
}

impl<'a> TestDiscovery<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        settings: &'a SettingsResolver,
        mode: TestingMode,
        environments: &'a SettingsEnvironments,
    ) -> Self {
        Self {
            fs,
            settings,
            mode,
            environments: (!environments.is_empty()).then_some(environments),
        }
    }

    pub fn discover(&self, paths: &[PathBuf]) -> Discovery {
        let mut found = Found::default();
        if !paths.is_empty() && paths.iter().all(|p| is_settings_file(p)) {
            for settings_file in paths {
                self.from_settings_file(settings_file, &mut found);
            }
        } else {
            for path in paths {
                self.from_path(path, &mut found);
            }
        }
        tracing::debug!(files = found.discovery.files.len(), "discovered test files");
        found.discovery
    }

    fn from_settings_file(&self, settings_file: &Path, found: &mut Found) {
        let dir = settings_file.parent().unwrap_or_else(|| Path::new(""));
        let scope = match self.settings.resolve(dir, self.environments) {
            Ok(scope) => scope,
            Err(e) => {
                found.error(settings_file, &e);
                return;
            }
        };

        if scope.tests.is_empty() {
            self.from_directory(dir, &scope, found);
            return;
        }
        for declaration in &scope.tests {
            let Some(path) = declaration.path.as_deref().map(PathBuf::from) else {
                continue;
            };
            if self.fs.is_file(&path) {
                found.add(&path, scope.clone());
            } else if self.fs.is_dir(&path) {
                let filter = match PathFilter::new(&declaration.includes, &declaration.excludes) {
                    Ok(filter) => filter,
                    Err(e) => {
                        found.error(settings_file, &e);
                        continue;
                    }
                };
                for file in self.candidates(&path) {
                    if filter.accepts(&file.to_string_lossy()) {
                        found.add(&file, scope.clone());
                    }
                }
            } else {
                tracing::warn!(path = %path.display(), "declared test path not found");
            }
        }
    }

    fn from_path(&self, path: &Path, found: &mut Found) {
        if self.fs.is_dir(path) {
            let scope = match self.settings.resolve(path, self.environments) {
                Ok(scope) => scope,
                Err(e) => {
                    found.error(path, &e);
                    return;
                }
            };
            self.from_directory(path, &scope, found);
        } else if self.fs.is_file(path) {
            if !self.mode.accepts(path) {
                tracing::debug!(path = %path.display(), "not a test file for this mode");
                return;
            }
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            match self.settings.resolve(dir, self.environments) {
                Ok(scope) => found.add(path, scope),
                Err(e) => found.error(path, &e),
            }
        } else {
            tracing::warn!(path = %path.display(), "test path not found");
        }
    }

    /// Every test file below `dir`, each resolved to its own scope
    fn from_directory(&self, dir: &Path, root_scope: &Arc<SettingsScope>, found: &mut Found) {
        for file in self.candidates(dir) {
            let parent = file.parent().unwrap_or(dir);
            let scope = if path_key(parent) == path_key(dir) {
                root_scope.clone()
            } else {
                match self.settings.resolve(parent, self.environments) {
                    Ok(scope) => scope,
                    Err(e) => {
                        found.error(&file, &e);
                        continue;
                    }
                }
            };
            if matches_declared_tests(&scope.tests, &file) {
                found.add(&file, scope);
            }
        }
    }

    fn candidates(&self, dir: &Path) -> Vec<PathBuf> {
        match self.fs.list_files(dir) {
            Ok(files) => files
                .into_iter()
                .filter(|f| self.mode.accepts(f) && !is_temp_file(f))
                .collect(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "cannot list test directory: {}", e);
                Vec::new()
            }
        }
    }
}

/// A scope with `Tests` entries only admits files one of them covers
fn matches_declared_tests(declarations: &[TestPathDeclaration], file: &Path) -> bool {
    if declarations.is_empty() {
        return true;
    }
    let file_key = path_key(file);
    declarations.iter().any(|declaration| {
        let Some(path) = declaration.path.as_deref() else {
            return false;
        };
        let key = path_key(Path::new(path));
        let covered = file_key == key || file_key.starts_with(&format!("{}/", key));
        covered
            && PathFilter::new(&declaration.includes, &declaration.excludes)
                .map(|filter| filter.accepts(&file.to_string_lossy()))
                .unwrap_or(false)
    })
}

fn is_settings_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(SETTINGS_FILE_NAME))
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().to_lowercase().starts_with(TEMP_FILE_PREFIX))
}

#[derive(Default)]
struct Found {
    discovery: Discovery,
    seen: HashSet<String>,
}

impl Found {
    fn add(&mut self, path: &Path, scope: Arc<SettingsScope>) {
        let path = normalize(path);
        if self.seen.insert(path_key(&path)) {
            self.discovery.files.push(DiscoveredFile { path, scope });
        }
    }

    fn error(&mut self, path: &Path, error: &Error) {
        tracing::warn!(path = %path.display(), "discovery failed: {}", error);
        self.discovery.errors.push(RunError::new(
            RunErrorKind::ContextBuild,
            &[path.to_path_buf()],
            error.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    fn discover(paths: &[PathBuf], mode: TestingMode) -> Discovery {
        let fs: Arc<dyn FileSystem> = Arc::new(StdFileSystem);
        let resolver = SettingsResolver::new(fs.clone());
        let envs = SettingsEnvironments::default();
        TestDiscovery::new(fs.as_ref(), &resolver, mode, &envs).discover(paths)
    }

    fn names(discovery: &Discovery) -> Vec<String> {
        discovery
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_directory_scan_filters_by_mode_and_temp_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.spec.js", "");
        write(tmp.path(), "b.spec.ts", "");
        write(tmp.path(), "types.d.ts", "");
        write(tmp.path(), "_jsharness.a.spec.js", "");
        write(tmp.path(), "notes.txt", "");

        let all = discover(&[tmp.path().to_path_buf()], TestingMode::All);
        assert_eq!(names(&all), vec!["a.spec.js", "b.spec.ts"]);

        let ts = discover(&[tmp.path().to_path_buf()], TestingMode::TypeScript);
        assert_eq!(names(&ts), vec!["b.spec.ts"]);
    }

    #[test]
    fn test_settings_files_use_declared_tests() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "specs/a.spec.js", "");
        write(tmp.path(), "specs/skip.spec.js", "");
        write(tmp.path(), "specs/helper.js", "");
        write(tmp.path(), "other/b.spec.js", "");
        let settings = write(
            tmp.path(),
            SETTINGS_FILE_NAME,
            r#"{ "Tests": [ { "Path": "specs", "Includes": ["*.spec.js"], "Excludes": ["*skip*"] } ] }"#,
        );

        let found = discover(&[settings], TestingMode::All);
        assert_eq!(names(&found), vec!["a.spec.js"]);
        assert!(found.errors.is_empty());
    }

    #[test]
    fn test_declared_tests_restrict_directory_scan() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "specs/a.spec.js", "");
        write(tmp.path(), "lib/util.js", "");
        write(tmp.path(), SETTINGS_FILE_NAME, r#"{ "Tests": [ { "Path": "specs" } ] }"#);

        let found = discover(&[tmp.path().to_path_buf()], TestingMode::All);
        assert_eq!(names(&found), vec!["a.spec.js"]);
    }

    #[test]
    fn test_malformed_settings_reported_per_path() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join("bad");
        write(&bad, SETTINGS_FILE_NAME, "{ nope");
        write(&bad, "a.js", "");
        let good = write(tmp.path(), "good/b.js", "");

        let found = discover(&[bad.join("a.js"), good], TestingMode::All);
        assert_eq!(names(&found), vec!["b.js"]);
        assert_eq!(found.errors.len(), 1);
        assert_eq!(found.errors[0].kind, RunErrorKind::ContextBuild);
    }

    #[test]
    fn test_duplicate_paths_discovered_once() {
        let tmp = TempDir::new().unwrap();
        let file = write(tmp.path(), "a.js", "");
        let found = discover(&[file.clone(), tmp.path().to_path_buf(), file], TestingMode::All);
        assert_eq!(names(&found), vec!["a.js"]);
    }
}
