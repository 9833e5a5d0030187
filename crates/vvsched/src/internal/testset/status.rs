use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Exit status that a test uses to report a numerical difference instead of a failure.
pub const DIFF_EXIT_STATUS: i32 = 64;

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Diff,
    Fail,
    Timeout,
}

impl TestResult {
    pub fn from_exit_status(code: i32) -> Self {
        match code {
            0 => TestResult::Pass,
            DIFF_EXIT_STATUS => TestResult::Diff,
            _ => TestResult::Fail,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TestState {
    #[default]
    NotRun,
    Running {
        started_at: SystemTime,
    },
    Done {
        result: TestResult,
        runtime: Duration,
        exit_status: Option<i32>,
    },
}

impl TestState {
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, TestState::Running { .. })
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, TestState::Done { .. })
    }

    pub fn result(&self) -> Option<TestResult> {
        match self {
            TestState::Done { result, .. } => Some(*result),
            _ => None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        match self {
            TestState::NotRun => ResultStatus::NotRun,
            TestState::Running { .. } => ResultStatus::NotDone,
            TestState::Done { result, .. } => match result {
                TestResult::Pass => ResultStatus::Pass,
                TestResult::Diff => ResultStatus::Diff,
                TestResult::Fail => ResultStatus::Fail,
                TestResult::Timeout => ResultStatus::Timeout,
            },
        }
    }
}

/// Flattened view of a test state, used for dependency evaluation and reporting.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    NotRun,
    NotDone,
    Pass,
    Diff,
    Fail,
    Timeout,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultStatus::NotRun => "notrun",
            ResultStatus::NotDone => "notdone",
            ResultStatus::Pass => "pass",
            ResultStatus::Diff => "diff",
            ResultStatus::Fail => "fail",
            ResultStatus::Timeout => "timeout",
        };
        f.write_str(name)
    }
}
