use std::fmt::Write;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use vvsched::{Map, Set};
use vvsched::testset::TestSize;

use crate::batch::common::{cancel_job, path_str, run_command};
use crate::batch::{
    BackendSettings, BatchBackend, JobId, JobScript, QueryResult, QueueState, SubmitResult,
};
use crate::common::utils::fs::get_current_dir;
use crate::common::utils::time::format_duration;

pub struct SlurmBackend {
    settings: BackendSettings,
}

impl SlurmBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl BatchBackend for SlurmBackend {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn header(&self, size: &TestSize, qtime: Duration, workdir: &Path, outfile: &Path) -> String {
        let outfile = outfile.display();
        let mut header = format!(
            r##"#SBATCH --time={walltime}
#SBATCH --nodes={nodes}
#SBATCH --output={outfile}
#SBATCH --error={outfile}
"##,
            walltime = format_duration(&qtime),
            nodes = self.settings.node_count(size).max(1),
        );
        if let Some(queue) = &self.settings.queue {
            writeln!(header, "#SBATCH --partition={queue}").unwrap();
        }
        if let Some(account) = &self.settings.account {
            writeln!(header, "#SBATCH --account={account}").unwrap();
        }
        if let Some(qos) = &self.settings.qos {
            writeln!(header, "#SBATCH --qos={qos}").unwrap();
        }
        writeln!(header, "cd {} || exit 1", workdir.display()).unwrap();
        header
    }

    fn submit(&mut self, job: &JobScript) -> Pin<Box<dyn Future<Output = SubmitResult>>> {
        let arguments = vec!["sbatch".to_string(), path_str(&job.script)];
        let workdir = job.workdir.clone();

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await;
            log::debug!("Sbatch output: {}", output.stdout.trim());
            let job_id = parse_sbatch_output(&output.stdout);
            let error = output.error.or_else(|| {
                job_id
                    .is_none()
                    .then(|| "Missing job id in sbatch output".to_string())
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
        let arguments = vec![
            "squeue".to_string(),
            "--noheader".to_string(),
            "-o".to_string(),
            "%i %t".to_string(),
        ];
        let jobs: Set<JobId> = jobs.iter().copied().collect();
        Box::pin(async move {
            let output = run_command(arguments, &get_current_dir()).await;
            QueryResult {
                states: parse_squeue_output(&output.stdout, &jobs),
                command: output.command,
                output: output.stdout,
                error: output.error,
            }
        })
    }

    fn cancel(&self, job: JobId) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>> {
        Box::pin(cancel_job(vec!["scancel".to_string(), job.to_string()]))
    }
}

/// Parses `sbatch: Submitted batch job 291041`
fn parse_sbatch_output(output: &str) -> Option<JobId> {
    let start = output.find("Submitted batch job")?;
    output[start..]
        .split_whitespace()
        .nth(3)
        .and_then(|id| id.parse().ok())
}

fn parse_squeue_output(output: &str, jobs: &Set<JobId>) -> Map<JobId, QueueState> {
    let mut states = Map::new();
    for line in output.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, state] = fields.as_slice() else {
            log::debug!("Unexpected squeue output line: {line:?}");
            continue;
        };
        let Some(id) = id.parse::<JobId>().ok().filter(|id| jobs.contains(id)) else {
            continue;
        };
        match *state {
            "R" => states.insert(id, QueueState::Running),
            "PD" => states.insert(id, QueueState::Pending),
            _ => continue,
        };
    }
    states
}

#[cfg(test)]
mod tests {
    use super::{SlurmBackend, parse_sbatch_output, parse_squeue_output};
    use crate::batch::{BackendSettings, BatchBackend, QueueState};
    use std::path::Path;
    use std::time::Duration;
    use vvsched::Set;
    use vvsched::testset::TestSize;

    #[test]
    fn test_parse_sbatch_output() {
        assert_eq!(
            parse_sbatch_output("sbatch: Submitted batch job 291041\n"),
            Some(291041)
        );
        assert_eq!(parse_sbatch_output("Submitted batch job 12"), Some(12));
        assert_eq!(parse_sbatch_output("Submitted batch job"), None);
        assert_eq!(
            parse_sbatch_output("sbatch: error: Batch job submission failed"),
            None
        );
    }

    #[test]
    fn test_parse_squeue_output() {
        let jobs: Set<u64> = [100, 101, 102, 103].into_iter().collect();
        let states = parse_squeue_output(
            "  100 R\n101 PD\n102 CG\n999 R\nunexpected line here\n\n",
            &jobs,
        );
        assert_eq!(states.len(), 2);
        assert_eq!(states[&100], QueueState::Running);
        assert_eq!(states[&101], QueueState::Pending);
    }

    #[test]
    fn test_slurm_header() {
        let backend = SlurmBackend::new(BackendSettings {
            cores_per_node: 36,
            queue: Some("short".to_string()),
            account: Some("FY1234".to_string()),
            qos: Some("normal".to_string()),
            ..Default::default()
        });
        let header = backend.header(
            &TestSize::procs(8),
            Duration::from_secs(5400),
            Path::new("/scratch/TestResults"),
            Path::new("/scratch/TestResults/batchset1/qbat-out.40"),
        );
        insta::assert_snapshot!(header, @r###"
        #SBATCH --time=01:30:00
        #SBATCH --nodes=1
        #SBATCH --output=/scratch/TestResults/batchset1/qbat-out.40
        #SBATCH --error=/scratch/TestResults/batchset1/qbat-out.40
        #SBATCH --partition=short
        #SBATCH --account=FY1234
        #SBATCH --qos=normal
        cd /scratch/TestResults || exit 1
        "###);
    }
}
