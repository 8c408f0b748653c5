//! jsharness - headless browser test orchestration
//!
//! Resolves hierarchical `jsharness.json` settings, flattens each test file's
//! reference graph, renders harness pages and runs them through a headless
//! runner with bounded parallelism, parsing the runner's event stream back
//! into test results.

pub mod commands;
pub mod common;
pub mod framework;
pub mod fs;
pub mod harness;
pub mod protocol;
pub mod references;
pub mod runner;
pub mod settings;

// Re-export commonly used types for tests
pub use common::{Error, Result, RunError, RunErrorKind};
pub use runner::{RunCallback, RunOptions, RunOrchestrator, RunOutcome};
pub use settings::{SettingsResolver, SettingsScope};
