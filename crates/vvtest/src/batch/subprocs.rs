use std::cell::RefCell;
use std::fs::File;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use vvsched::Map;
use vvsched::testset::TestSize;

use crate::batch::common::path_str;
use crate::batch::{BatchBackend, JobId, JobScript, QueryResult, QueueState, SubmitResult};

/// Runs job scripts as background processes on the local machine.
///
/// Each script runs in its own process group; the job id is the pid of the shell.
#[derive(Default)]
pub struct SubprocsBackend {
    children: Rc<RefCell<Map<JobId, Child>>>,
}

impl SubprocsBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn spawn_script(job: &JobScript) -> anyhow::Result<Child> {
    let output = File::create(&job.outfile)
        .with_context(|| format!("Cannot create output file {}", job.outfile.display()))?;
    let error = output.try_clone()?;

    let mut command = Command::new("/bin/sh");
    command
        .arg(&job.script)
        .current_dir(&job.workdir)
        .stdin(Stdio::null())
        .stdout(output)
        .stderr(error)
        .process_group(0);
    command
        .spawn()
        .with_context(|| format!("Cannot start job script {}", job.script.display()))
}

impl BatchBackend for SubprocsBackend {
    fn name(&self) -> &'static str {
        "subprocs"
    }

    fn header(&self, _size: &TestSize, _qtime: Duration, workdir: &Path, _outfile: &Path) -> String {
        format!("cd {} || exit 1\n", workdir.display())
    }

    fn submit(&mut self, job: &JobScript) -> Pin<Box<dyn Future<Output = SubmitResult>>> {
        let command = format!("/bin/sh {}", path_str(&job.script));
        let result = spawn_script(job).and_then(|child| {
            child
                .id()
                .map(|pid| (JobId::from(pid), child))
                .ok_or_else(|| anyhow::anyhow!("Job script exited before its pid was read"))
        });
        let result = match result {
            Ok((job_id, child)) => {
                self.children.borrow_mut().insert(job_id, child);
                SubmitResult {
                    command,
                    output: format!("Started process {job_id}"),
                    job_id: Some(job_id),
                    error: None,
                }
            }
            Err(error) => SubmitResult {
                command,
                output: String::new(),
                job_id: None,
                error: Some(format!("{error:#}")),
            },
        };
        Box::pin(async move { result })
    }

    fn query(&mut self, jobs: &[JobId]) -> Pin<Box<dyn Future<Output = QueryResult>>> {
        let mut children = self.children.borrow_mut();
        let mut states = Map::with_capacity(jobs.len());
        for job_id in jobs {
            let Some(child) = children.get_mut(job_id) else {
                continue;
            };
            match child.try_wait() {
                Ok(None) => {
                    states.insert(*job_id, QueueState::Running);
                }
                Ok(Some(status)) => {
                    log::debug!("Job process {job_id} finished with {status}");
                    children.remove(job_id);
                }
                Err(error) => {
                    log::warn!("Cannot get status of job process {job_id}: {error}");
                    children.remove(job_id);
                }
            }
        }
        let result = QueryResult {
            command: "wait".to_string(),
            output: String::new(),
            states,
            error: None,
        };
        Box::pin(async move { result })
    }

    fn cancel(&self, job: JobId) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>> {
        let children = self.children.clone();
        Box::pin(async move {
            if !children.borrow().contains_key(&job) {
                return Ok(());
            }
            let pgid = Pid::from_raw(job as i32);
            if let Err(error) = signal::killpg(pgid, Some(Signal::SIGINT)) {
                log::warn!("Cannot send SIGINT to PGID {pgid}: {error:?}");
            }
            Ok(())
        })
    }
}
