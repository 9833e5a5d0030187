use crate::internal::common::ids::{GroupId, TestId};
use crate::internal::testset::dependency::{DependencySpec, TestDependency};
use crate::internal::testset::status::{ResultStatus, TestResult, TestState};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Processor and device requirement of a single test.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TestSize {
    pub np: u32,
    #[serde(default)]
    pub ndevice: Option<u32>,
}

impl TestSize {
    pub fn new(np: u32, ndevice: Option<u32>) -> Self {
        TestSize { np, ndevice }
    }

    pub fn procs(np: u32) -> Self {
        TestSize { np, ndevice: None }
    }

    /// Number of devices the test needs, treating "unspecified" as zero.
    #[inline]
    pub fn devices(&self) -> u32 {
        self.ndevice.unwrap_or(0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TestCase {
    pub id: TestId,
    /// Unique display name, also used as the execution directory of the test.
    pub name: String,
    pub size: TestSize,
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Runtime of a previous execution, used to start long tests first.
    #[serde(default)]
    pub runtime: Option<Duration>,
    #[serde(default)]
    pub analyze: bool,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub depends_on: Vec<DependencySpec>,
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub state: TestState,

    #[serde(skip)]
    pub(crate) dependencies: Vec<TestDependency>,
    #[serde(skip)]
    pub(crate) has_dependent: bool,
}

impl TestCase {
    pub fn new(id: TestId, name: impl Into<String>, size: TestSize, command: Vec<String>) -> Self {
        TestCase {
            id,
            name: name.into(),
            size,
            command,
            timeout: None,
            runtime: None,
            analyze: false,
            group: None,
            depends_on: Vec::new(),
            skip: None,
            state: TestState::NotRun,
            dependencies: Vec::new(),
            has_dependent: false,
        }
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }

    #[inline]
    pub fn result_status(&self) -> ResultStatus {
        self.state.status()
    }

    /// Dependencies connected when the scheduler was built.
    #[inline]
    pub fn dependencies(&self) -> &[TestDependency] {
        &self.dependencies
    }

    #[inline]
    pub fn num_dependencies(&self) -> usize {
        self.dependencies.len()
    }

    /// True when another test depends on this one.
    #[inline]
    pub fn has_dependent(&self) -> bool {
        self.has_dependent
    }

    pub fn set_running(&mut self, started_at: SystemTime) {
        self.state = TestState::Running { started_at };
    }

    pub fn set_done(&mut self, result: TestResult, runtime: Duration, exit_status: Option<i32>) {
        self.state = TestState::Done {
            result,
            runtime,
            exit_status,
        };
    }
}
