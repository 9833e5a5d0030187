use std::fmt::Write;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use vvsched::Map;
use vvsched::testset::TestSize;

use crate::batch::common::{cancel_job, path_str, run_command};
use crate::batch::{
    BackendSettings, BatchBackend, JobId, JobScript, QueryResult, QueueState, SubmitResult,
};
use crate::common::utils::fs::get_current_dir;
use crate::common::utils::time::minutes_of_time;

/// IBM Spectrum LSF (`bsub`, `bjobs`, `bkill`).
pub struct LsfBackend {
    settings: BackendSettings,
}

impl LsfBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl BatchBackend for LsfBackend {
    fn name(&self) -> &'static str {
        "lsf"
    }

    fn header(&self, size: &TestSize, qtime: Duration, workdir: &Path, outfile: &Path) -> String {
        let outfile = outfile.display();
        let mut header = format!(
            "#BSUB -W {minutes}\n#BSUB -nnodes {nodes}\n#BSUB -o {outfile}\n#BSUB -e {outfile}\n",
            minutes = minutes_of_time(&qtime),
            nodes = self.settings.node_count(size).max(1),
        );
        if let Some(queue) = &self.settings.queue {
            writeln!(header, "#BSUB -q {queue}").unwrap();
        }
        writeln!(header, "cd {} || exit 1", workdir.display()).unwrap();
        header
    }

    fn submit(&mut self, job: &JobScript) -> Pin<Box<dyn Future<Output = SubmitResult>>> {
        let script_name = job
            .script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str(&job.script));
        let mut arguments = vec![
            "bsub".to_string(),
            "-J".to_string(),
            script_name,
            "-e".to_string(),
            path_str(&job.outfile),
            "-o".to_string(),
            path_str(&job.outfile),
            "-cwd".to_string(),
            path_str(&job.workdir),
        ];
        if let Some(queue) = &self.settings.queue {
            arguments.push("-q".to_string());
            arguments.push(queue.clone());
        }
        arguments.push(path_str(&job.script));
        let workdir = job.workdir.clone();

        Box::pin(async move {
            let output = run_command(arguments, &workdir).await;
            let job_id = parse_bsub_output(&output.stdout);
            let error = output.error.or_else(|| {
                job_id
                    .is_none()
                    .then(|| "Missing job id in bsub output".to_string())
            });
            SubmitResult {
                command: output.command,
                output: output.stdout,
                job_id: job_id.filter(|_| error.is_none()),
                error,
            }
        })
    }

    fn query(&mut self, _jobs: &[JobId]) -> Pin<Box<dyn Future<Output = QueryResult>>> {
        let arguments: Vec<String> = ["bjobs", "-noheader", "-o", "jobid stat"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Box::pin(async move {
            let output = run_command(arguments, &get_current_dir()).await;
            QueryResult {
                states: parse_bjobs_output(&output.stdout),
                command: output.command,
                output: output.stdout,
                error: output.error,
            }
        })
    }

    fn cancel(&self, job: JobId) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>> {
        Box::pin(cancel_job(vec!["bkill".to_string(), job.to_string()]))
    }
}

/// Parses `Job <68628> is submitted to default queue <normal>.`
fn parse_bsub_output(output: &str) -> Option<JobId> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word != "Job" {
                continue;
            }
            let id = words.next()?;
            let rest: Vec<&str> = words.by_ref().take(3).collect();
            if rest == ["is", "submitted", "to"] {
                return id
                    .strip_prefix('<')
                    .and_then(|id| id.strip_suffix('>'))
                    .and_then(|id| id.parse().ok());
            }
            return None;
        }
        None
    })
}

fn parse_bjobs_output(output: &str) -> Map<JobId, QueueState> {
    let mut states = Map::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(id), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(id) = id.parse::<JobId>() else {
            continue;
        };
        let state = match state {
            "PROV" | "RUN" | "USUSP" => QueueState::Running,
            "PEND" | "PSUSP" | "WAIT" => QueueState::Pending,
            _ => continue,
        };
        states.insert(id, state);
    }
    states
}

#[cfg(test)]
mod tests {
    use super::{LsfBackend, parse_bjobs_output, parse_bsub_output};
    use crate::batch::{BackendSettings, BatchBackend, QueueState};
    use std::path::Path;
    use std::time::Duration;
    use vvsched::testset::TestSize;

    #[test]
    fn test_parse_bsub_output() {
        assert_eq!(
            parse_bsub_output("Job <68628> is submitted to default queue <normal>.\n"),
            Some(68628)
        );
        assert_eq!(
            parse_bsub_output("Warning: something\nJob <7> is submitted to queue <pdebug>.\n"),
            Some(7)
        );
        assert_eq!(parse_bsub_output("Job <abc> is submitted to queue"), None);
        assert_eq!(parse_bsub_output("Request aborted by esub."), None);
        assert_eq!(parse_bsub_output(""), None);
    }

    #[test]
    fn test_parse_bjobs_output() {
        let states = parse_bjobs_output("12 RUN\n13 PEND\n14 DONE\n15 PSUSP\nbogus\n16 PROV\n");
        assert_eq!(states.len(), 4);
        assert_eq!(states[&12], QueueState::Running);
        assert_eq!(states[&13], QueueState::Pending);
        assert_eq!(states[&15], QueueState::Pending);
        assert_eq!(states[&16], QueueState::Running);
        assert!(!states.contains_key(&14));
    }

    #[test]
    fn test_lsf_header() {
        let backend = LsfBackend::new(BackendSettings {
            cores_per_node: 44,
            queue: Some("pbatch".to_string()),
            ..Default::default()
        });
        let header = backend.header(
            &TestSize::procs(50),
            Duration::from_secs(3700),
            Path::new("/work/TestResults"),
            Path::new("/work/TestResults/batchset0/qbat-out.3"),
        );
        insta::assert_snapshot!(header, @r###"
        #BSUB -W 62
        #BSUB -nnodes 2
        #BSUB -o /work/TestResults/batchset0/qbat-out.3
        #BSUB -e /work/TestResults/batchset0/qbat-out.3
        #BSUB -q pbatch
        cd /work/TestResults || exit 1
        "###);
    }
}
