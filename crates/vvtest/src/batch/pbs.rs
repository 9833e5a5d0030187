use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use vvsched::testset::TestSize;
use vvsched::{Map, Set};

use crate::batch::common::{cancel_job, path_str, run_command};
use crate::batch::{
    BackendSettings, BatchBackend, JobId, JobScript, QueryResult, QueueState, SubmitResult,
};
use crate::common::utils::fs::get_current_dir;
use crate::common::utils::time::format_duration;

pub struct PbsBackend {
    settings: BackendSettings,
}

impl PbsBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }

    fn uses_select(&self) -> bool {
        self.settings.variation.as_deref() == Some("select")
    }
}

impl BatchBackend for PbsBackend {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn header(&self, size: &TestSize, qtime: Duration, workdir: &Path, outfile: &Path) -> String {
        let nodes = self.settings.node_count(size).max(1);
        let ppn = self.settings.cores_per_node;
        let resources = if self.uses_select() {
            format!("select={nodes}:mpiprocs={ppn}:ncpus={ppn}")
        } else {
            format!("nodes={nodes}:ppn={ppn}")
        };
        format!(
            r##"#PBS -l {resources}
#PBS -l walltime={walltime}
#PBS -j oe
#PBS -o {outfile}
cd {workdir} || exit 1
"##,
            walltime = format_duration(&qtime),
            outfile = outfile.display(),
            workdir = workdir.display(),
        )
    }

    fn submit(&mut self, job: &JobScript) -> Pin<Box<dyn Future<Output = SubmitResult>>> {
        let mut arguments = vec!["qsub".to_string()];
        if let Some(queue) = &self.settings.queue {
            arguments.extend(["-q".to_string(), queue.clone()]);
        }
        if let Some(account) = &self.settings.account {
            arguments.extend(["-A".to_string(), account.clone()]);
        }
        arguments.extend([
            "-o".to_string(),
            path_str(&job.outfile),
            "-j".to_string(),
            "oe".to_string(),
            path_str(&job.script),
        ]);
        let workdir = job.workdir.clone();

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await;
            let job_id = parse_qsub_output(&output.stdout);
            let error = output.error.or_else(|| {
                job_id
                    .is_none()
                    .then(|| "Missing job id in qsub output".to_string())
            });
            SubmitResult {
                command: output.command,
                output: output.stdout,
                job_id: job_id.filter(|_| error.is_none()),
                error,
            }
        })
    }

    fn query(&mut self, jobs: &[JobId]) -> Pin<Box<dyn Future<Output = QueryResult>>> {
        let jobs: Set<JobId> = jobs.iter().copied().collect();
        Box::pin(async move {
            let output = run_command(vec!["qstat".to_string()], &get_current_dir()).await;
            QueryResult {
                states: parse_qstat_output(&output.stdout, &jobs),
                command: output.command,
                output: output.stdout,
                error: output.error,
            }
        })
    }

    fn cancel(&self, job: JobId) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>> {
        Box::pin(cancel_job(vec!["qdel".to_string(), job.to_string()]))
    }
}

/// Leading digits of a PBS job name such as `12345.sdb`.
fn numeric_prefix(text: &str) -> Option<JobId> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// The output must be a single token, e.g. `12345.pbsserver`.
fn parse_qsub_output(output: &str) -> Option<JobId> {
    let mut words = output.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => numeric_prefix(word),
        _ => None,
    }
}

fn parse_qstat_output(output: &str, jobs: &Set<JobId>) -> Map<JobId, QueueState> {
    let mut states = Map::new();
    for line in output.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            log::debug!("Unexpected qstat output line: {line:?}");
            continue;
        }
        let Some(id) = numeric_prefix(fields[0]).filter(|id| jobs.contains(id)) else {
            continue;
        };
        match fields[4] {
            "R" => states.insert(id, QueueState::Running),
            "Q" => states.insert(id, QueueState::Pending),
            _ => continue,
        };
    }
    states
}
