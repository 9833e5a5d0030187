pub mod common;
pub mod driver;
pub mod grouper;
pub mod job;
mod lsf;
mod pbs;
pub mod runjob;
pub mod script;
mod slurm;
mod subprocs;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use vvsched::Map;
use vvsched::testset::TestSize;

use crate::common::error::error;
use crate::config::{BatchConfig, BatchSystem, PlatformConfig};

pub use lsf::LsfBackend;
pub use pbs::PbsBackend;
pub use slurm::SlurmBackend;
pub use subprocs::SubprocsBackend;

/// Identifier assigned to a job by the batch system.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Pending,
    Running,
    /// Not listed by the queue (finished, cancelled or never known)
    Absent,
}

#[derive(Debug, Default)]
pub struct SubmitResult {
    pub command: String,
    pub output: String,
    /// Set only when the submission succeeded.
    pub job_id: Option<JobId>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub command: String,
    pub output: String,
    /// Jobs that the queue reported as pending or running.
    pub states: Map<JobId, QueueState>,
    pub error: Option<String>,
}

impl QueryResult {
    pub fn state(&self, job_id: JobId) -> QueueState {
        self.states
            .get(&job_id)
            .copied()
            .unwrap_or(QueueState::Absent)
    }
}

/// Paths of a single job script submission.
#[derive(Debug, Clone)]
pub struct JobScript {
    pub script: PathBuf,
    pub workdir: PathBuf,
    pub outfile: PathBuf,
}

/// Settings shared by the queue backends.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub cores_per_node: u32,
    pub devices_per_node: Option<u32>,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    /// Resource syntax variation (PBS `select`)
    pub variation: Option<String>,
}

impl BackendSettings {
    pub fn from_config(batch: &BatchConfig, platform: &PlatformConfig) -> Self {
        BackendSettings {
            cores_per_node: platform.cores_per_node.unwrap_or(1),
            devices_per_node: platform.devices_per_node,
            queue: batch.queue.clone(),
            account: batch.account.clone(),
            qos: batch.qos.clone(),
            variation: batch.variation.clone(),
        }
    }

    pub fn node_count(&self, size: &TestSize) -> u32 {
        compute_node_count(size, self.cores_per_node, self.devices_per_node)
    }
}

/// Interface to a batch queue (or to anything that can run job scripts in the background).
///
/// Returned futures do not borrow the backend, so jobs can be queried and cancelled
/// concurrently.
pub trait BatchBackend {
    fn name(&self) -> &'static str;

    /// Directive lines placed at the top of a job script (newline terminated).
    fn header(&self, size: &TestSize, qtime: Duration, workdir: &Path, outfile: &Path) -> String;

    fn submit(&mut self, job: &JobScript) -> Pin<Box<dyn Future<Output = SubmitResult>>>;

    /// Gets the queue state of the given jobs; unknown jobs are reported as absent.
    fn query(&mut self, jobs: &[JobId]) -> Pin<Box<dyn Future<Output = QueryResult>>>;

    fn cancel(&self, job: JobId) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;
}

/// Number of compute nodes needed for the given number of processors and devices.
pub fn compute_node_count(size: &TestSize, cores_per_node: u32, devices_per_node: Option<u32>) -> u32 {
    let mut nodes = size.np.div_ceil(cores_per_node.max(1));
    if let Some(dpn) = devices_per_node {
        let devices = size.devices();
        if dpn > 0 && devices > 0 {
            nodes = nodes.max(devices.div_ceil(dpn));
        }
    }
    nodes
}

pub fn create_batch_backend(
    batch: &BatchConfig,
    platform: &PlatformConfig,
) -> crate::Result<Box<dyn BatchBackend>> {
    if batch.system != BatchSystem::Subprocs && platform.cores_per_node.is_none() {
        return error(format!(
            "Batch system `{}` requires `cores_per_node` to be set",
            system_name(batch.system)
        ));
    }
    let settings = BackendSettings::from_config(batch, platform);
    Ok(match batch.system {
        BatchSystem::Lsf => Box::new(LsfBackend::new(settings)),
        BatchSystem::Slurm => Box::new(SlurmBackend::new(settings)),
        BatchSystem::Pbs => Box::new(PbsBackend::new(settings)),
        BatchSystem::Subprocs => Box::new(SubprocsBackend::new()),
    })
}

fn system_name(system: BatchSystem) -> &'static str {
    match system {
        BatchSystem::Lsf => "lsf",
        BatchSystem::Slurm => "slurm",
        BatchSystem::Pbs => "pbs",
        BatchSystem::Subprocs => "subprocs",
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchSystem, compute_node_count, create_batch_backend};
    use crate::config::{BatchConfig, PlatformConfig};
    use vvsched::testset::TestSize;

    #[test]
    fn test_node_count() {
        assert_eq!(compute_node_count(&TestSize::procs(17), 8, None), 3);
        assert_eq!(compute_node_count(&TestSize::procs(16), 8, None), 2);
        assert_eq!(compute_node_count(&TestSize::procs(1), 8, Some(2)), 1);
        assert_eq!(compute_node_count(&TestSize::new(4, Some(5)), 8, Some(2)), 3);
        assert_eq!(compute_node_count(&TestSize::new(4, Some(5)), 8, Some(0)), 1);
        assert_eq!(compute_node_count(&TestSize::new(4, Some(5)), 8, None), 1);
    }

    #[test]
    fn test_factory_requires_cores_per_node() {
        let mut batch = BatchConfig {
            system: BatchSystem::Slurm,
            ..Default::default()
        };
        let mut platform = PlatformConfig::default();
        assert!(create_batch_backend(&batch, &platform).is_err());

        platform.cores_per_node = Some(36);
        assert_eq!(
            create_batch_backend(&batch, &platform).unwrap().name(),
            "slurm"
        );

        batch.system = BatchSystem::Subprocs;
        platform.cores_per_node = None;
        assert_eq!(
            create_batch_backend(&batch, &platform).unwrap().name(),
            "subprocs"
        );
    }
}
