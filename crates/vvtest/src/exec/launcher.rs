use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::Context;
use vvsched::testset::{TestCase, TestResult};

use crate::common::utils::fs::test_directory;
use crate::platform::ResourceHandle;

/// Name of the file (in the test directory) that receives the output of a test.
pub const TEST_OUTPUT_FILE: &str = "execute.log";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    /// Terminated by a signal that was not sent by the launcher
    Signaled,
    TimedOut,
}

impl ProcessExit {
    pub fn to_result(self) -> (TestResult, Option<i32>) {
        match self {
            ProcessExit::Exited(code) => (TestResult::from_exit_status(code), Some(code)),
            ProcessExit::Signaled => (TestResult::Fail, None),
            ProcessExit::TimedOut => (TestResult::Timeout, None),
        }
    }
}

pub trait RunningProcess {
    /// Returns the exit of the process once it has finished, never blocks.
    fn poll(&mut self) -> Option<ProcessExit>;

    fn kill(&mut self);
}

pub trait ProcessLauncher {
    fn launch(
        &mut self,
        test: &TestCase,
        resources: &ResourceHandle,
    ) -> anyhow::Result<Box<dyn RunningProcess>>;
}

/// Starts tests as child processes of this process, each in its own directory below `test_root`.
pub struct LocalLauncher {
    test_root: PathBuf,
}

impl LocalLauncher {
    pub fn new(test_root: PathBuf) -> Self {
        LocalLauncher { test_root }
    }
}

impl ProcessLauncher for LocalLauncher {
    fn launch(
        &mut self,
        test: &TestCase,
        resources: &ResourceHandle,
    ) -> anyhow::Result<Box<dyn RunningProcess>> {
        let directory = test_directory(&self.test_root, &test.name);
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Cannot create test directory {}", directory.display()))?;
        let output = std::fs::File::create(directory.join(TEST_OUTPUT_FILE))
            .context("Cannot create test output file")?;

        let (program, args) = test
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Test {} has an empty command", test.name))?;
        log::debug!("Running command `{}`", test.command.join(" "));

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&directory)
            .stdin(Stdio::null())
            .stdout(output.try_clone()?)
            .stderr(output)
            .env("VVTEST_TEST_NAME", &test.name)
            .envs(resources.env())
            .kill_on_drop(true);
        let child = command
            .spawn()
            .with_context(|| format!("Cannot start `{program}`"))?;

        Ok(Box::new(LocalProcess {
            child,
            deadline: test.timeout.map(|timeout| Instant::now() + timeout),
            timed_out: false,
        }))
    }
}

struct LocalProcess {
    child: tokio::process::Child,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl RunningProcess for LocalProcess {
    fn poll(&mut self) -> Option<ProcessExit> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(if self.timed_out {
                ProcessExit::TimedOut
            } else {
                status
                    .code()
                    .map(ProcessExit::Exited)
                    .unwrap_or(ProcessExit::Signaled)
            }),
            Ok(None) => {
                if !self.timed_out && self.deadline.is_some_and(|d| Instant::now() >= d) {
                    log::debug!("Test process {:?} timed out", self.child.id());
                    self.timed_out = true;
                    self.kill();
                }
                None
            }
            Err(error) => {
                log::warn!("Cannot get status of test process: {error}");
                Some(ProcessExit::Signaled)
            }
        }
    }

    fn kill(&mut self) {
        if let Err(error) = self.child.start_kill() {
            log::debug!("Cannot kill test process: {error}");
        }
    }
}
