//! User-level configuration file handling
//!
//! Per-directory test settings live in `jsharness.json` files (see
//! [`crate::settings`]). This file covers machine-wide choices: where the
//! headless runner and browser live, and default run limits.

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Headless runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Interactive browser settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Default run settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Test framework description
    #[serde(default)]
    pub framework: FrameworkConfig,
}

/// Headless runner configuration
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Runner executable; looked up on PATH when relative
    #[serde(default = "default_runner")]
    pub executable: PathBuf,

    /// Script passed as the first argument to the runner, if any
    pub script: Option<PathBuf>,

    /// Additional arguments placed before the harness arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: default_runner(),
            script: None,
            args: Vec::new(),
        }
    }
}

fn default_runner() -> PathBuf {
    PathBuf::from("jsharness-headless")
}

/// Interactive browser configuration
#[derive(Debug, Deserialize, Default)]
pub struct BrowserConfig {
    /// Browser executable; the platform opener is used when unset
    pub executable: Option<PathBuf>,
}

/// Default run settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Maximum units built in parallel (defaults to the CPU count)
    pub parallelism: Option<usize>,

    /// Stop building new units after this many attempts
    #[serde(default = "default_file_search_limit")]
    pub file_search_limit: usize,

    /// Per-file timeout; overrides `TestFileTimeout` from the settings files
    pub timeout_ms: Option<u64>,

    /// User agent string passed to the runner
    pub user_agent: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            parallelism: None,
            file_search_limit: default_file_search_limit(),
            timeout_ms: None,
            user_agent: None,
        }
    }
}

fn default_file_search_limit() -> usize {
    300
}
/// Test framework description used to build the framework plugin
#[derive(Debug, Deserialize, Default)]
pub struct FrameworkConfig {
    /// Framework name matched against the settings `Framework` field
    pub name: Option<String>,

    /// Files the harness loads before any reference
    #[serde(default)]
    pub dependencies: Vec<PathBuf>,

    /// File names recognized as the framework's own scripts
    #[serde(default)]
    pub known_files: Vec<String>,

    /// Regex matching each test declaration in a file under test
    pub test_pattern: Option<String>,

    /// Harness template rendered for this framework's tests
    pub harness_template: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, e))?;
                return Self::parse(&content).map_err(|e| match e {
                    Error::Config(message) => Error::config_parse(&path, message),
                    other => other,
                });
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Locate the runner executable
    ///
    /// Absolute or relative paths with a directory component must exist;
    /// bare names are searched on PATH.
    pub fn runner_executable(&self) -> Result<PathBuf> {
        locate(&self.runner.executable)
    }
}

/// Resolve an executable either as a concrete path or via PATH
pub fn locate(executable: &std::path::Path) -> Result<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        if executable.is_file() {
            return Ok(executable.to_path_buf());
        }
        return Err(Error::ProcessSetup(format!(
            "'{}' does not exist",
            executable.display()
        )));
    }
    which::which(executable).map_err(|e| {
        Error::ProcessSetup(format!("'{}' not found on PATH: {}", executable.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
[runner]
executable = "/opt/runner/bin/headless"
script = "/opt/runner/run.js"
args = ["--no-sandbox"]

[defaults]
parallelism = 2
file_search_limit = 50
timeout_ms = 3000

[framework]
name = "qunit"
dependencies = ["/opt/qunit/qunit.js"]
known_files = ["qunit.js"]
"#,
        )
        .unwrap();

        assert_eq!(config.runner.args, vec!["--no-sandbox"]);
        assert_eq!(config.defaults.parallelism, Some(2));
        assert_eq!(config.defaults.file_search_limit, 50);
        assert_eq!(config.framework.known_files, vec!["qunit.js"]);
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.defaults.file_search_limit, 300);
        assert_eq!(config.defaults.timeout_ms, None);
        assert_eq!(config.runner.executable, PathBuf::from("jsharness-headless"));
    }

    #[test]
    fn test_locate_missing_path_is_setup_error() {
        let err = locate(std::path::Path::new("/definitely/not/here/runner")).unwrap_err();
        assert!(matches!(err, Error::ProcessSetup(_)));
    }
}
