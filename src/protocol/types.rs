//! Test result model
//!
//! Payload types follow the runner's camelCase JSON. The summary types are
//! what callers get back from a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

// === Event Payloads ===

/// One assertion inside a test case
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(default)]
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// A single test, as reported by `TestStart` and `TestDone`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    pub test_name: String,
    /// Stamped by the reader when the runner leaves it out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_test_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Milliseconds
    #[serde(default)]
    pub time_taken: u64,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
}

impl TestCase {
    /// A test passes when every assertion passed; no assertions counts as passed
    pub fn passed(&self) -> bool {
        self.test_results.iter().all(|r| r.passed)
    }
}

/// Console output captured from the harness
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestLog {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_test_file: Option<PathBuf>,
}

/// A script error raised while a file was running
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_test_file: Option<PathBuf>,
}

/// `FileStart` and `FileDone` payloads; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    #[serde(default)]
    pub input_test_file: Option<PathBuf>,
    #[serde(default)]
    pub time_taken: Option<u64>,
}

// === Summaries ===

/// Results accumulated for one file, one unit, or a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub tests: Vec<TestCase>,
    pub logs: Vec<TestLog>,
    pub errors: Vec<TestError>,
    /// Milliseconds
    pub time_taken: u64,
}

impl TestSummary {
    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tests.len() - self.passed_count()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.logs.is_empty() && self.errors.is_empty()
    }

    /// Whether every test passed and no error was recorded
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.failed_count() == 0
    }

    /// Move everything from `other` into `self`
    pub fn append(&mut self, other: TestSummary) {
        self.tests.extend(other.tests);
        self.logs.extend(other.logs);
        self.errors.extend(other.errors);
        self.time_taken += other.time_taken;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_without_results_passes() {
        let case: TestCase = serde_json::from_str(r#"{"testName":"t1","testResults":[]}"#).unwrap();
        assert!(case.passed());
        assert_eq!(case.test_name, "t1");
    }

    #[test]
    fn test_case_with_failed_assertion_fails() {
        let case: TestCase = serde_json::from_str(
            r#"{"testName":"t","moduleName":"m","testResults":[{"passed":true},{"passed":false,"actual":1,"expected":"2"}]}"#,
        )
        .unwrap();
        assert!(!case.passed());
        assert_eq!(case.test_results[1].actual, Some(serde_json::json!(1)));
    }

    #[test]
    fn test_summary_counts_and_append() {
        let mut summary = TestSummary {
            tests: vec![TestCase {
                test_name: "a".into(),
                ..Default::default()
            }],
            time_taken: 5,
            ..Default::default()
        };
        summary.append(TestSummary {
            tests: vec![TestCase {
                test_name: "b".into(),
                test_results: vec![TestResult::default()],
                ..Default::default()
            }],
            errors: vec![TestError {
                message: "Script error".into(),
                ..Default::default()
            }],
            time_taken: 7,
            ..Default::default()
        });

        assert_eq!(summary.passed_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.time_taken, 12);
        assert!(!summary.succeeded());
    }
}
