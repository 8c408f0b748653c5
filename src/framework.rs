//! Test framework plugins
//!
//! Recognizing which framework a file uses is left to the host. What the
//! pipeline needs from a framework is small: its own script files, how to
//! spot them among references, and where test declarations sit in a file.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::references::FilePosition;
use crate::settings::SettingsScope;

/// A test framework the harness can host
pub trait FrameworkDefinition: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a reference path names one of the framework's own scripts
    fn is_framework_dependency(&self, reference: &str) -> bool;

    /// Scripts the harness loads before any reference
    fn file_dependencies(&self, scope: &SettingsScope) -> Vec<PathBuf>;

    /// Harness template file used when the scope sets no `CustomTestHarnessPath`
    fn harness_template(&self) -> Option<&Path> {
        None
    }

    /// Pattern locating test declarations, if the framework has one
    fn test_pattern(&self) -> Option<&Regex> {
        None
    }

    /// Positions of test declarations in a file under test, in source order
    ///
    /// A scope-level `TestPattern` takes precedence over the framework's own.
    fn test_positions(&self, text: &str, scope: &SettingsScope) -> Vec<FilePosition> {
        if let Some(custom) = scope.test_pattern.as_deref() {
            match Regex::new(custom) {
                Ok(regex) => return positions_of(&regex, text),
                Err(e) => tracing::warn!(pattern = custom, "invalid TestPattern: {}", e),
            }
        }
        self.test_pattern()
            .map(|regex| positions_of(regex, text))
            .unwrap_or_default()
    }
}

/// 1-based line and column of every match of `regex` in `text`
pub fn positions_of(regex: &Regex, text: &str) -> Vec<FilePosition> {
    let mut positions = Vec::new();
    let mut line = 1u32;
    let mut line_start = 0usize;
    let mut scanned = 0usize;

    for found in regex.find_iter(text) {
        for (offset, ch) in text[scanned..found.start()].char_indices() {
            if ch == '\n' {
                line += 1;
                line_start = scanned + offset + 1;
            }
        }
        scanned = found.start();
        let column = text[line_start..found.start()].chars().count() as u32 + 1;
        positions.push(FilePosition { line, column });
    }
    positions
}

/// A framework described entirely by data (usually the user config)
#[derive(Debug, Clone)]
pub struct DeclaredFramework {
    name: String,
    dependencies: Vec<PathBuf>,
    /// Lower-cased file names
    known_files: Vec<String>,
    test_pattern: Option<Regex>,
    harness_template: Option<PathBuf>,
}

impl DeclaredFramework {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            known_files: Vec::new(),
            test_pattern: None,
            harness_template: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<PathBuf>) -> Self {
        // The dependencies themselves are always recognized as framework files
        for dep in &dependencies {
            if let Some(name) = dep.file_name() {
                self.known_files.push(name.to_string_lossy().to_lowercase());
            }
        }
        self.dependencies = dependencies;
        self
    }

    pub fn with_known_files<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.known_files
            .extend(names.iter().map(|n| n.as_ref().to_lowercase()));
        self
    }

    pub fn with_test_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid test pattern '{}': {}", pattern, e)))?;
        self.test_pattern = Some(regex);
        Ok(self)
    }

    pub fn with_harness_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.harness_template = Some(template.into());
        self
    }
}

impl FrameworkDefinition for DeclaredFramework {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_framework_dependency(&self, reference: &str) -> bool {
        let file_name = Path::new(&reference.replace('\\', "/"))
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase());
        file_name.is_some_and(|name| self.known_files.iter().any(|known| *known == name))
    }

    fn file_dependencies(&self, _scope: &SettingsScope) -> Vec<PathBuf> {
        self.dependencies.clone()
    }

    fn test_pattern(&self) -> Option<&Regex> {
        self.test_pattern.as_ref()
    }

    fn harness_template(&self) -> Option<&Path> {
        self.harness_template.as_deref()
    }
}

/// Pick the framework named by the scope, falling back to the first one
pub fn select(
    frameworks: &[Arc<dyn FrameworkDefinition>],
    scope: &SettingsScope,
) -> Option<Arc<dyn FrameworkDefinition>> {
    let named = scope.framework.as_deref().and_then(|wanted| {
        frameworks
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(wanted))
    });
    named.or_else(|| frameworks.first()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_files_match_by_file_name() {
        let framework = DeclaredFramework::new("qunit")
            .with_dependencies(vec![PathBuf::from("/opt/qunit/qunit.js")])
            .with_known_files(&["qunit.css"]);
        assert!(framework.is_framework_dependency("../lib/QUnit.js"));
        assert!(framework.is_framework_dependency(r"lib\qunit.css"));
        assert!(!framework.is_framework_dependency("app.js"));
    }

    #[test]
    fn test_positions_are_one_based() {
        let regex = Regex::new(r#"test\("#).unwrap();
        let text = "module('m');\ntest('a', f);\n  test('b', f);\n";
        let positions = positions_of(&regex, text);
        assert_eq!(
            positions,
            vec![
                FilePosition { line: 2, column: 1 },
                FilePosition { line: 3, column: 3 }
            ]
        );
    }

    #[test]
    fn test_scope_pattern_overrides_framework_pattern() {
        let framework = DeclaredFramework::new("x")
            .with_test_pattern(r"it\(")
            .unwrap();
        let scope = SettingsScope {
            test_pattern: Some(r"spec\(".to_string()),
            ..Default::default()
        };
        let positions = framework.test_positions("it(1)\nspec(2)\n", &scope);
        assert_eq!(positions, vec![FilePosition { line: 2, column: 1 }]);
    }

    #[test]
    fn test_select_by_name_or_first() {
        let a: Arc<dyn FrameworkDefinition> = Arc::new(DeclaredFramework::new("jasmine"));
        let b: Arc<dyn FrameworkDefinition> = Arc::new(DeclaredFramework::new("mocha"));
        let frameworks = vec![a, b];

        let scope = SettingsScope {
            framework: Some("Mocha".into()),
            ..Default::default()
        };
        assert_eq!(select(&frameworks, &scope).unwrap().name(), "mocha");
        assert_eq!(
            select(&frameworks, &SettingsScope::default()).unwrap().name(),
            "jasmine"
        );
        assert!(select(&[], &scope).is_none());
    }
}
