//! Error types for the test runner
//!
//! `Error` covers failures that stop an operation outright. Failures that only
//! affect a single execution unit are downgraded to a [`RunError`] record so the
//! rest of the run can continue and the caller still receives a summary.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the runner
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Invalid settings file '{path}': {message}")]
    ConfigParse { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Reference Errors ===
    #[error("Reference could not be resolved: {0}")]
    Resolution(String),

    // === Compile Errors ===
    #[error("Batch compile for '{settings_dir}' failed: {message}")]
    Compile {
        settings_dir: String,
        message: String,
    },

    // === Process Errors ===
    #[error("Required executable not available: {0}")]
    ProcessSetup(String),

    #[error("Failed to launch process: {0}")]
    ProcessLaunch(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Collaborator Errors ===
    #[error("Harness error: {0}")]
    Harness(String),

    #[error("Web server error: {0}")]
    Server(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a settings parse error for a file
    pub fn config_parse(path: &std::path::Path, message: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a compile error for a settings directory
    pub fn compile(settings_dir: &std::path::Path, message: impl ToString) -> Self {
        Self::Compile {
            settings_dir: settings_dir.display().to_string(),
            message: message.to_string(),
        }
    }

    /// The run error category this error maps to when it escapes a single unit
    pub fn run_error_kind(&self) -> RunErrorKind {
        match self {
            Error::Compile { .. } => RunErrorKind::Compile,
            Error::Harness(_) => RunErrorKind::Harness,
            Error::Timeout(_) => RunErrorKind::Timeout,
            Error::ProcessLaunch(_) | Error::Protocol(_) => RunErrorKind::Execution,
            _ => RunErrorKind::ContextBuild,
        }
    }
}

/// Category of a per-unit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Settings or reference resolution failed while building the unit
    ContextBuild,
    /// The batch compiler for the unit's scope exited with an error
    Compile,
    /// The harness document could not be rendered
    Harness,
    /// Launching or reading the runner process failed
    Execution,
    /// The runner reported (or we observed) a timeout
    Timeout,
    /// The runner exited with an unrecognized exit code
    Unknown,
}

/// Structured per-unit failure, reported through the run callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    /// Input files of the unit the error belongs to
    pub input_files: Vec<PathBuf>,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, input_files: &[PathBuf], message: impl Into<String>) -> Self {
        Self {
            kind,
            input_files: input_files.to_vec(),
            message: message.into(),
        }
    }

    /// Wrap an error that escaped a unit
    pub fn from_error(error: &Error, input_files: &[PathBuf]) -> Self {
        Self::new(error.run_error_kind(), input_files, error.to_string())
    }
}
