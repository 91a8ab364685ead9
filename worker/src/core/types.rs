//! Shared deterministic types for worker core logic.

use std::ffi::OsStr;

use serde::{Deserialize, Serialize};

/// One version-control revision, as displayed in release notes.
///
/// All fields are opaque display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
}

/// Outcome of one package's test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
}

/// Result of running one test package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTestResult {
    /// Package path relative to the source directory (`.` for the root).
    pub package: String,
    /// Combined stdout and stderr, in arrival order.
    pub output: String,
    pub outcome: TestOutcome,
}

/// Naming convention that marks a file as a test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFileMatcher {
    suffix: String,
}

impl TestFileMatcher {
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// True if `file_name` ends with the configured suffix and is more than the suffix.
    pub fn matches(&self, file_name: &OsStr) -> bool {
        let Some(name) = file_name.to_str() else {
            return false;
        };
        name.len() > self.suffix.len() && name.ends_with(&self.suffix)
    }
}

impl Default for TestFileMatcher {
    fn default() -> Self {
        Self::with_suffix("_test.go")
    }
}
