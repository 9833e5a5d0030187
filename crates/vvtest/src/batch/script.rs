use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vvsched::testset::TestCase;

use crate::batch::common::CLEAN_EXIT_MARKER;
use crate::batch::job::{BatchId, BatchJob, JobFiles};
use crate::batch::BatchBackend;
use crate::common::utils::time::format_duration;

/// Number of jobs whose files share one `batchset` directory.
const JOBS_PER_DIRECTORY: u32 = 50;

/// Paths of the files of batch jobs, grouped into `batchset<N>` directories below the root.
pub struct BatchFileNamer {
    root: PathBuf,
}

impl BatchFileNamer {
    pub fn new(root: &Path) -> Self {
        BatchFileNamer {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subdir(&self, id: BatchId) -> PathBuf {
        let index = (id.as_num() + JOBS_PER_DIRECTORY / 2) / JOBS_PER_DIRECTORY;
        self.root.join(format!("batchset{index}"))
    }

    fn path(&self, basename: &str, id: BatchId) -> PathBuf {
        self.subdir(id).join(format!("{basename}.{id}"))
    }

    pub fn job_files(&self, id: BatchId) -> JobFiles {
        JobFiles {
            script: self.path("qbat", id),
            outfile: self.path("qbat-out", id),
            job_file: self.path("qbat-job", id),
            results_file: self.path("qbat-results", id),
        }
    }

    /// Existing batch directories, e.g. left over from a previous run.
    pub fn batch_directories(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("batchset"))
            .map(|entry| entry.path())
            .collect();
        dirs.sort();
        dirs
    }
}

/// Description of a batch job, read by `vvtest run-job` inside the job script.
#[derive(Serialize, Deserialize, Debug)]
pub struct JobFile {
    pub batch_id: BatchId,
    pub test_root: PathBuf,
    pub results_file: PathBuf,
    pub num_procs: u32,
    #[serde(default)]
    pub num_devices: Option<u32>,
    pub tests: Vec<TestCase>,
}

impl JobFile {
    pub fn write(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read job file {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Parts of a job script that do not depend on the job.
#[derive(Debug, Clone, Default)]
pub struct ScriptSettings {
    /// Program and arguments that run a job file
    pub job_command: Vec<String>,
    /// Replaces the computed queue time in the header
    pub walltime: Option<Duration>,
    pub shim: Option<String>,
    pub env: BTreeMap<String, String>,
}

pub fn build_job_script(
    backend: &dyn BatchBackend,
    settings: &ScriptSettings,
    job: &BatchJob,
    qtime: Duration,
    workdir: &Path,
) -> String {
    let header = backend.header(
        &job.size,
        settings.walltime.unwrap_or(qtime),
        workdir,
        &job.files.outfile,
    );
    let mut script = format!(
        "#!/bin/sh\n{header}touch {outfile} || exit 1\n",
        outfile = job.files.outfile.display()
    );
    if let Some(shim) = &settings.shim {
        writeln!(script, "{shim}").unwrap();
    }
    write!(
        script,
        "\necho \"job start time = `date`\"\necho \"job time limit = {}\"\n",
        format_duration(&qtime)
    )
    .unwrap();
    for (key, value) in &settings.env {
        writeln!(script, "export {key}=\"{value}\"").unwrap();
    }
    let mut command = settings.job_command.clone();
    command.push(job.files.job_file.display().to_string());
    write!(
        script,
        "{} || exit 1\n\necho \"{CLEAN_EXIT_MARKER}\"\n",
        command.join(" ")
    )
    .unwrap();
    script
}

#[cfg(test)]
mod tests {
    use super::{BatchFileNamer, ScriptSettings, build_job_script};
    use crate::batch::job::{BatchId, BatchJobHandler};
    use crate::batch::{BackendSettings, SlurmBackend};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use vvsched::TestId;
    use vvsched::testset::TestSize;

    #[test]
    fn test_batch_file_names() {
        let namer = BatchFileNamer::new(Path::new("/tr"));
        assert_eq!(namer.subdir(BatchId::new(0)), PathBuf::from("/tr/batchset0"));
        assert_eq!(namer.subdir(BatchId::new(24)), PathBuf::from("/tr/batchset0"));
        assert_eq!(namer.subdir(BatchId::new(25)), PathBuf::from("/tr/batchset1"));
        assert_eq!(namer.subdir(BatchId::new(74)), PathBuf::from("/tr/batchset1"));
        assert_eq!(namer.subdir(BatchId::new(75)), PathBuf::from("/tr/batchset2"));

        let files = namer.job_files(BatchId::new(3));
        assert_eq!(files.script, PathBuf::from("/tr/batchset0/qbat.3"));
        assert_eq!(files.outfile, PathBuf::from("/tr/batchset0/qbat-out.3"));
    }

    #[test]
    fn test_batch_directories() {
        let dir = tempfile::TempDir::with_prefix("vvtest").unwrap();
        std::fs::create_dir(dir.path().join("batchset1")).unwrap();
        std::fs::create_dir(dir.path().join("batchset0")).unwrap();
        std::fs::create_dir(dir.path().join("mesh")).unwrap();
        let namer = BatchFileNamer::new(dir.path());
        assert_eq!(
            namer.batch_directories(),
            vec![dir.path().join("batchset0"), dir.path().join("batchset1")]
        );
    }

    #[test]
    fn test_build_job_script() {
        let namer = BatchFileNamer::new(Path::new("/tr"));
        let mut handler = BatchJobHandler::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        let id = handler.create_job(vec![TestId::new(1)], TestSize::procs(4), &namer);
        let backend = SlurmBackend::new(BackendSettings {
            cores_per_node: 16,
            ..Default::default()
        });
        let settings = ScriptSettings {
            job_command: vec!["/opt/bin/vvtest".to_string(), "run-job".to_string()],
            walltime: None,
            shim: Some("module load mpi".to_string()),
            env: [("OMP_NUM_THREADS".to_string(), "1".to_string())]
                .into_iter()
                .collect(),
        };

        let script = build_job_script(
            &backend,
            &settings,
            handler.job(id),
            Duration::from_secs(600),
            Path::new("/tr"),
        );
        insta::assert_snapshot!(script, @r###"
        #!/bin/sh
        #SBATCH --time=00:10:00
        #SBATCH --nodes=1
        #SBATCH --output=/tr/batchset0/qbat-out.0
        #SBATCH --error=/tr/batchset0/qbat-out.0
        cd /tr || exit 1
        touch /tr/batchset0/qbat-out.0 || exit 1
        module load mpi

        echo "job start time = `date`"
        echo "job time limit = 00:10:00"
        export OMP_NUM_THREADS="1"
        /opt/bin/vvtest run-job /tr/batchset0/qbat-job.0 || exit 1

        echo "queue job finished cleanly"
        "###);
    }
}
