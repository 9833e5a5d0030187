use crate::internal::common::ids::TestId;
use crate::internal::testset::graph::TestGraph;
use crate::internal::testset::status::ResultStatus;
use serde::{Deserialize, Serialize};

/// Reason reported for a declared dependency whose target does not exist.
pub const FAILED_MATCH_REASON: &str = "failed 'depends on' matching criteria";

/// Which results of the target test let the dependent test proceed.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// The target has to pass (a diff is accepted as well).
    #[default]
    Hard,
    /// The target merely has to be finished, or be known to never run.
    Soft,
}

impl DependencyPolicy {
    pub fn is_satisfied_by(self, status: ResultStatus) -> bool {
        match self {
            DependencyPolicy::Hard => matches!(status, ResultStatus::Pass | ResultStatus::Diff),
            DependencyPolicy::Soft => true,
        }
    }
}

/// Dependency as declared in the test list, the target is referenced by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DependencySpec {
    pub target: String,
    #[serde(default)]
    pub policy: DependencyPolicy,
}

impl DependencySpec {
    pub fn new(target: impl Into<String>, policy: DependencyPolicy) -> Self {
        DependencySpec {
            target: target.into(),
            policy,
        }
    }
}

/// Connected dependency edge of a test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestDependency {
    Test {
        target: TestId,
        policy: DependencyPolicy,
    },
    /// Declared dependency that could not be resolved, it blocks forever.
    Failed { reason: String },
}

impl TestDependency {
    pub fn target(&self) -> Option<TestId> {
        match self {
            TestDependency::Test { target, .. } => Some(*target),
            TestDependency::Failed { .. } => None,
        }
    }

    pub fn is_blocking(&self, graph: &TestGraph) -> bool {
        match self {
            TestDependency::Failed { .. } => true,
            TestDependency::Test { target, policy } => {
                let test = graph.test(*target);
                if test.state.is_done() || test.is_skipped() {
                    !policy.is_satisfied_by(test.result_status())
                } else if test.state.is_running() {
                    true
                } else if graph.will_never_run(*target) {
                    !policy.is_satisfied_by(test.result_status())
                } else {
                    true
                }
            }
        }
    }

    pub fn will_never_run(&self, graph: &TestGraph) -> bool {
        match self {
            TestDependency::Failed { .. } => true,
            TestDependency::Test { target, policy } => {
                let test = graph.test(*target);
                if test.state.is_done() || test.is_skipped() {
                    !policy.is_satisfied_by(test.result_status())
                } else if test.state.is_running() {
                    false
                } else {
                    graph.will_never_run(*target) && !policy.is_satisfied_by(test.result_status())
                }
            }
        }
    }

    /// Human readable description of what is being waited for.
    pub fn blocked_reason(&self, graph: &TestGraph) -> String {
        match self {
            TestDependency::Failed { reason } => reason.clone(),
            TestDependency::Test { target, .. } => graph.test(*target).name.clone(),
        }
    }
}
