use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::common::cli::RunOpts;
use crate::common::utils::fs::absolute_path;
use crate::common::utils::time::{deserialize_human_duration, deserialize_human_duration_opt};

/// Overrides the time the batch driver sleeps between job checks (in seconds).
pub const BATCH_SLEEP_ENV: &str = "VVTEST_BATCH_SLEEP_LENGTH";

/// Processor count used when the number of CPUs cannot be detected.
const FALLBACK_NUM_PROCS: u32 = 4;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BatchSystem {
    #[default]
    Lsf,
    Slurm,
    Pbs,
    /// Runs job scripts as local background processes
    Subprocs,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub num_procs: Option<u32>,
    pub max_procs: Option<u32>,
    pub num_devices: Option<u32>,
    pub max_devices: Option<u32>,
    pub cores_per_node: Option<u32>,
    pub devices_per_node: Option<u32>,
}

impl PlatformConfig {
    pub fn resolved_num_procs(&self) -> u32 {
        self.num_procs.unwrap_or_else(detect_num_procs)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub system: BatchSystem,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    /// PBS resource syntax variation (`select`)
    pub variation: Option<String>,
    /// Maximum number of jobs submitted at the same time
    pub qsub_limit: u32,
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub sleep: Duration,
    /// Tests are packed into one job until their summed timeouts reach this length
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub batch_length: Duration,
    #[serde(deserialize_with = "deserialize_human_duration_opt")]
    pub max_timeout: Option<Duration>,
    /// Fixed queue time for every job, replaces the computed one
    #[serde(deserialize_with = "deserialize_human_duration_opt")]
    pub walltime: Option<Duration>,
    /// Command prepended to the job command in job scripts
    pub shim: Option<String>,
    pub env: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub check_interval: Duration,
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub check_timeout: Duration,
    /// A job that vanished from the queue is considered stopped only after this time
    #[serde(deserialize_with = "deserialize_human_duration")]
    pub settle_time: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            system: BatchSystem::default(),
            queue: None,
            account: None,
            qos: None,
            variation: None,
            qsub_limit: 5,
            sleep: Duration::from_secs(15),
            batch_length: Duration::from_secs(30 * 60),
            max_timeout: None,
            walltime: None,
            shim: None,
            env: BTreeMap::new(),
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(5 * 60),
            settle_time: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub platform: PlatformConfig,
    pub batch: BatchConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Everything a run needs to know, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub test_root: PathBuf,
    pub results_file: PathBuf,
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub platform: PlatformConfig,
    pub batch: BatchConfig,
}

impl RunConfig {
    pub fn new(test_root: PathBuf) -> Self {
        RunConfig {
            results_file: test_root.join("results.jsonl"),
            test_root,
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(5 * 60),
            platform: PlatformConfig::default(),
            batch: BatchConfig::default(),
        }
    }

    /// Combines the config file, environment and command line (in increasing priority).
    pub fn from_opts(opts: &RunOpts) -> crate::Result<Self> {
        let file = match &opts.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let mut config = RunConfig::new(absolute_path(opts.test_root.clone()));
        config.platform = file.platform;
        config.batch = file.batch;

        if let Some(sleep) = get_duration_from_env(BATCH_SLEEP_ENV) {
            config.batch.sleep = sleep;
        }

        let platform = &mut config.platform;
        override_opt(&mut platform.num_procs, opts.num_procs);
        override_opt(&mut platform.max_procs, opts.max_procs);
        override_opt(&mut platform.num_devices, opts.num_devices);
        override_opt(&mut platform.max_devices, opts.max_devices);
        override_opt(&mut platform.cores_per_node, opts.cores_per_node);
        override_opt(&mut platform.devices_per_node, opts.devices_per_node);

        let batch = &mut config.batch;
        if let Some(system) = opts.batch_system {
            batch.system = system;
        }
        if let Some(limit) = opts.qsub_limit {
            batch.qsub_limit = limit;
        }
        if let Some(length) = opts.batch_length {
            batch.batch_length = length;
        }
        override_opt(&mut batch.walltime, opts.walltime);
        override_opt(&mut batch.queue, opts.queue.clone());
        override_opt(&mut batch.account, opts.account.clone());

        if let Some(results) = &opts.results {
            config.results_file = absolute_path(results.clone());
        }
        config.poll_interval = opts.poll_interval;
        Ok(config)
    }
}

fn override_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn detect_num_procs() -> u32 {
    match psutil::cpu::cpu_count() {
        0 => FALLBACK_NUM_PROCS,
        count => count as u32,
    }
}
