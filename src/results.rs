//! Result records produced by the runner.

use crate::case::Failure;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Final state of an executed case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultState::Passed => "passed",
            ResultState::Failed => "failed",
            ResultState::Errored => "errored",
            ResultState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Result of running a single case.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_file_path: PathBuf,
    pub description: String,
    pub state: ResultState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TestResult {
    /// True for `failed` and `errored` results.
    pub fn is_failure(&self) -> bool {
        matches!(self.state, ResultState::Failed | ResultState::Errored)
    }
}

/// Results in execution order.
pub type Results = Vec<TestResult>;

/// Per-state totals over a result sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn of<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        let mut summary = Summary::default();
        for result in results {
            match result.state {
                ResultState::Passed => summary.passed += 1,
                ResultState::Failed => summary.failed += 1,
                ResultState::Errored => summary.errored += 1,
                ResultState::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped
    }
}
