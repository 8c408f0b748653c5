//! Run progress notifications
//!
//! Callbacks may arrive from several units at once, so implementations keep
//! their own interior state behind a lock or atomics.

use std::path::Path;

use crate::common::RunError;
use crate::protocol::{TestCase, TestError, TestLog, TestSummary};

/// Receives run lifecycle events; every method defaults to a no-op
#[allow(unused_variables)]
pub trait RunCallback: Send + Sync {
    fn test_suite_started(&self) {}

    fn test_suite_finished(&self, summary: &TestSummary) {}

    fn file_started(&self, path: &Path) {}

    fn file_finished(&self, path: &Path, summary: &TestSummary) {}

    fn test_started(&self, test: &TestCase) {}

    fn test_finished(&self, test: &TestCase) {}

    fn file_log(&self, log: &TestLog) {}

    fn file_error(&self, error: &TestError) {}

    /// A unit failed outside the test protocol (build, compile, launch, timeout)
    fn exception_thrown(&self, error: &RunError) {}
}

/// Callback that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallback;

impl RunCallback for NullCallback {}
