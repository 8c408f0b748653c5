//! Common utilities shared by the resolver, orchestrator and CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod pattern;

pub use error::{Error, Result, RunError, RunErrorKind};
