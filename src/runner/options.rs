//! Run options

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::TestContext;
use crate::common::config::Config;
use crate::common::paths::extension_of;
use crate::common::Result;
use crate::settings::SettingsEnvironments;

/// Whether the runner executes tests or only enumerates them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestExecutionMode {
    #[default]
    Execution,
    Discovery,
}

impl TestExecutionMode {
    /// Argument understood by the headless runner
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Discovery => "discovery",
        }
    }
}

/// Which kinds of files count as tests during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestingMode {
    JavaScript,
    TypeScript,
    CoffeeScript,
    Html,
    #[default]
    All,
}

impl TestingMode {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::JavaScript => &[".js", ".mjs"],
            Self::TypeScript => &[".ts", ".tsx"],
            Self::CoffeeScript => &[".coffee"],
            Self::Html => &[".html", ".htm"],
            Self::All => &[".js", ".mjs", ".ts", ".tsx", ".coffee", ".html", ".htm"],
        }
    }

    /// Whether a path has one of this mode's test extensions
    ///
    /// TypeScript declaration files never count as tests.
    pub fn accepts(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".d.ts") {
            return false;
        }
        extension_of(path).is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }
}

/// Launches a harness in a caller-controlled way
#[async_trait]
pub trait CustomLauncher: Send + Sync {
    async fn launch(&self, context: &TestContext, harness_url: &str) -> Result<()>;
}

/// How each harness is opened
#[derive(Clone, Default)]
pub enum LaunchMode {
    /// Run in the headless runner and read its event stream
    #[default]
    Headless,
    /// Open in an interactive browser; results are not collected
    FullBrowser,
    Custom(Arc<dyn CustomLauncher>),
}

impl LaunchMode {
    pub fn is_headless(&self) -> bool {
        matches!(self, Self::Headless)
    }
}

impl fmt::Debug for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Headless => write!(f, "Headless"),
            Self::FullBrowser => write!(f, "FullBrowser"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Headless runner invocation
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    pub executable: PathBuf,
    /// Script handed to the runner before the harness arguments
    pub script: Option<PathBuf>,
    pub args: Vec<String>,
}

impl Default for RunnerCommand {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("jsharness-headless"),
            script: None,
            args: Vec::new(),
        }
    }
}

/// Options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Requested degree of parallelism; the CPU count when unset
    pub parallelism: Option<usize>,
    /// Units attempted before no further units are built
    pub file_search_limit: usize,
    /// Per-file timeout; overrides the settings `TestFileTimeout`
    pub timeout_ms: Option<u64>,
    pub execution_mode: TestExecutionMode,
    pub launch_mode: LaunchMode,
    pub testing_mode: TestingMode,
    pub environments: SettingsEnvironments,
    pub user_agent: Option<String>,
    pub runner: RunnerCommand,
    /// Browser for [`LaunchMode::FullBrowser`]; the platform opener when unset
    pub browser: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallelism: None,
            file_search_limit: 300,
            timeout_ms: None,
            execution_mode: TestExecutionMode::default(),
            launch_mode: LaunchMode::default(),
            testing_mode: TestingMode::default(),
            environments: SettingsEnvironments::default(),
            user_agent: None,
            runner: RunnerCommand::default(),
            browser: None,
        }
    }
}

impl RunOptions {
    /// Options seeded from the user configuration file
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.defaults.parallelism,
            file_search_limit: config.defaults.file_search_limit,
            timeout_ms: config.defaults.timeout_ms,
            user_agent: config.defaults.user_agent.clone(),
            runner: RunnerCommand {
                executable: config.runner.executable.clone(),
                script: config.runner.script.clone(),
                args: config.runner.args.clone(),
            },
            browser: config.browser.executable.clone(),
            ..Self::default()
        }
    }
}
