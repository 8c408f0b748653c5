//! Settings file data model
//!
//! A `jsharness.json` file deserializes straight into [`SettingsScope`]. Path
//! fields hold the raw text from the file until the resolver expands them;
//! after resolution they are absolute paths (or URLs where that is allowed).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::paths::path_key;

/// File name searched for when walking up from a directory
pub const SETTINGS_FILE_NAME: &str = "jsharness.json";

/// Default per-file timeout handed to the runner
pub const DEFAULT_TEST_FILE_TIMEOUT_MS: u64 = 10_000;

/// Where generated harness files are written
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum HarnessLocationMode {
    /// Next to the (first) test file of the unit
    #[default]
    TestFileAdjacent,
    /// Next to the settings file that governs the unit
    SettingsFileAdjacent,
    /// In `TestHarnessDirectory`
    Custom,
}

/// How the harness loads referenced scripts
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum HarnessReferenceMode {
    /// Plain script tags in dependency order
    #[default]
    Normal,
    /// Files are loaded as AMD modules
    #[serde(rename = "AMD")]
    Amd,
}

/// Meaning of a reference path that starts with a path root
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum RootReferencePathMode {
    /// `/x.js` is the file system root
    #[default]
    DriveRoot,
    /// `/x.js` is relative to the settings directory
    SettingsFileDirectory,
}

/// How sources are compiled before the harness is built
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum CompileMode {
    /// Run `Executable` once per settings scope
    Executable,
    /// Outputs are produced by some external build; only map paths
    External,
}

/// How an HTML template reference is injected into the harness
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum TemplateMode {
    /// Inserted verbatim
    #[default]
    Raw,
    /// Wrapped in a `<script>` element carrying `id` and `type`
    Script,
}

/// Options carried by template references
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TemplateOptions {
    pub mode: TemplateMode,
    pub id: Option<String>,
    #[serde(rename = "Type")]
    pub script_type: Option<String>,
}

/// A reference declared in the settings file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReferenceDeclaration {
    /// File or directory; defaults to the settings directory
    pub path: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default = "default_true")]
    pub include_in_test_harness: bool,
    #[serde(default)]
    pub is_test_framework_file: bool,
    pub template_options: Option<TemplateOptions>,
    /// Directory of the settings file that declared this reference
    #[serde(skip)]
    pub settings_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

/// A test path declared in the settings file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestPathDeclaration {
    /// File or directory; defaults to the settings directory
    pub path: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(skip)]
    pub settings_dir: PathBuf,
}

/// A result transform (e.g. a report writer) declared in the settings file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TransformDeclaration {
    pub name: String,
    pub path: Option<String>,
}

/// Source to output mapping for compiled files
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CompilePathMap {
    pub source_path: Option<String>,
    pub output_path: Option<String>,
}

/// Batch compile configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompileSettings {
    pub mode: Option<CompileMode>,
    pub executable: Option<String>,
    pub arguments: Option<String>,
    pub working_directory: Option<String>,
    /// Milliseconds before the compiler process is abandoned
    pub timeout: Option<u64>,
    pub paths: Vec<CompilePathMap>,
    pub extensions: Option<Vec<String>>,
    pub extensions_with_no_output: Option<Vec<String>>,
    pub use_source_maps: Option<bool>,
    pub skip_if_unchanged: Option<bool>,
    #[serde(skip)]
    pub settings_dir: PathBuf,
}

/// Web server hosting configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerSettings {
    pub enabled: Option<bool>,
    pub default_port: Option<u16>,
    pub root_path: Option<String>,
    /// Injected by the host for testing; always propagates through inheritance
    #[serde(skip)]
    pub forced: bool,
}

impl ServerSettings {
    /// A server configuration every scope adopts, whatever it declares
    pub fn forced(port: Option<u16>, root_path: Option<String>) -> Self {
        Self {
            enabled: Some(true),
            default_port: port,
            root_path,
            forced: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// One resolved settings file, merged with its ancestors
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SettingsScope {
    pub inherit_from_parent: bool,
    pub inherit_from_path: Option<String>,

    pub framework: Option<String>,
    pub enable_test_file_batching: Option<bool>,
    pub parallelism: Option<usize>,
    pub test_file_timeout: Option<u64>,
    pub test_pattern: Option<String>,

    pub test_harness_location_mode: Option<HarnessLocationMode>,
    pub test_harness_directory: Option<String>,
    pub test_harness_reference_mode: Option<HarnessReferenceMode>,
    pub root_reference_path_mode: Option<RootReferencePathMode>,
    pub custom_test_harness_path: Option<String>,

    pub code_coverage_success_percentage: Option<f64>,
    pub code_coverage_includes: Vec<String>,
    pub code_coverage_excludes: Vec<String>,
    pub code_coverage_ignores: Vec<String>,

    pub references: Vec<ReferenceDeclaration>,
    pub tests: Vec<TestPathDeclaration>,
    pub transforms: Vec<TransformDeclaration>,

    pub compile: Option<CompileSettings>,
    pub server: Option<ServerSettings>,

    #[serde(rename = "AMDBaseUrl")]
    pub amd_base_url: Option<String>,
    #[serde(rename = "AMDAppDirectory")]
    pub amd_app_directory: Option<String>,
    /// Deprecated; only consulted when neither of the fields above is set
    #[serde(rename = "AMDBasePath")]
    pub amd_base_path: Option<String>,

    pub user_agent: Option<String>,
    pub browser_arguments: BTreeMap<String, String>,
    pub ignore_resource_loading_errors: Option<bool>,
    pub enable_tracing: Option<bool>,
    pub trace_file_path: Option<String>,

    /// Directory holding the settings file; `None` for the default scope
    #[serde(skip)]
    pub settings_dir: Option<PathBuf>,
    #[serde(skip)]
    pub settings_file: Option<PathBuf>,
    #[serde(skip)]
    pub is_default: bool,
}

impl SettingsScope {
    /// The scope used when no settings file governs a directory
    pub fn default_sentinel() -> Self {
        Self {
            enable_test_file_batching: Some(false),
            test_file_timeout: Some(DEFAULT_TEST_FILE_TIMEOUT_MS),
            test_harness_location_mode: Some(HarnessLocationMode::TestFileAdjacent),
            test_harness_reference_mode: Some(HarnessReferenceMode::Normal),
            root_reference_path_mode: Some(RootReferencePathMode::DriveRoot),
            ignore_resource_loading_errors: Some(false),
            enable_tracing: Some(false),
            is_default: true,
            ..Self::default()
        }
    }

    pub fn settings_dir(&self) -> Option<&Path> {
        self.settings_dir.as_deref()
    }

    /// Cache/grouping key; the default scope shares one empty key
    pub fn key(&self) -> String {
        self.settings_dir().map(path_key).unwrap_or_default()
    }

    pub fn batching_enabled(&self) -> bool {
        self.enable_test_file_batching.unwrap_or(false)
    }

    pub fn test_file_timeout_ms(&self) -> u64 {
        self.test_file_timeout.unwrap_or(DEFAULT_TEST_FILE_TIMEOUT_MS)
    }

    pub fn harness_location_mode(&self) -> HarnessLocationMode {
        self.test_harness_location_mode.unwrap_or_default()
    }

    pub fn reference_mode(&self) -> HarnessReferenceMode {
        self.test_harness_reference_mode.unwrap_or_default()
    }

    pub fn root_reference_path_mode(&self) -> RootReferencePathMode {
        self.root_reference_path_mode.unwrap_or_default()
    }

    pub fn server_enabled(&self) -> bool {
        self.server.as_ref().is_some_and(ServerSettings::is_enabled)
    }

    pub fn ignore_resource_loading_errors(&self) -> bool {
        self.ignore_resource_loading_errors.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_settings_file() {
        let json = r#"{
            "InheritFromParent": true,
            "EnableTestFileBatching": true,
            "Parallelism": 4,
            "TestHarnessLocationMode": "SettingsFileAdjacent",
            "TestHarnessReferenceMode": "AMD",
            "References": [
                { "Path": "lib", "Includes": ["*.js"], "IncludeInTestHarness": false }
            ],
            "Tests": [ { "Path": "tests" } ],
            "Compile": { "Mode": "Executable", "Executable": "tsc", "Paths": [ { "SourcePath": "src", "OutputPath": "out" } ] },
            "Server": { "Enabled": true, "DefaultPort": 9000 },
            "AMDBaseUrl": "scripts",
            "BrowserArguments": { "chrome": "--headless" },
            "SomeUnknownField": 1
        }"#;

        let scope: SettingsScope = serde_json::from_str(json).unwrap();
        assert!(scope.inherit_from_parent);
        assert!(scope.batching_enabled());
        assert_eq!(scope.parallelism, Some(4));
        assert_eq!(
            scope.harness_location_mode(),
            HarnessLocationMode::SettingsFileAdjacent
        );
        assert_eq!(scope.reference_mode(), HarnessReferenceMode::Amd);
        assert!(!scope.references[0].include_in_test_harness);
        assert_eq!(scope.compile.as_ref().unwrap().mode, Some(CompileMode::Executable));
        assert!(scope.server_enabled());
        assert!(!scope.is_default);
    }

    #[test]
    fn test_reference_defaults() {
        let reference: ReferenceDeclaration = serde_json::from_str(r#"{ "Path": "a.js" }"#).unwrap();
        assert!(reference.include_in_test_harness);
        assert!(!reference.is_test_framework_file);
    }

    #[test]
    fn test_default_sentinel() {
        let scope = SettingsScope::default_sentinel();
        assert!(scope.is_default);
        assert_eq!(scope.key(), "");
        assert_eq!(scope.test_file_timeout_ms(), DEFAULT_TEST_FILE_TIMEOUT_MS);
        assert!(!scope.server_enabled());
    }
}
