use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::common::utils::time::parse_hms_or_human_time;
use crate::config::BatchSystem;

#[derive(Parser)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(long, global = true, help_heading("GLOBAL OPTIONS"))]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::VVTEST_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[allow(clippy::large_enum_variant)]
#[derive(Parser)]
pub enum SubCommand {
    /// Runs the tests of a test list
    Run(RunOpts),
    /// Runs the tests of a single batch job (used inside job scripts)
    #[command(hide = true)]
    RunJob(RunJobOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Test list file (TOML)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub test_list: PathBuf,

    /// Configuration file with platform and batch settings
    #[arg(long, env = "VVTEST_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory in which the tests are executed
    #[arg(long, default_value = "TestResults", value_hint = clap::ValueHint::DirPath)]
    pub test_root: PathBuf,

    /// Path of the results file [default: <test-root>/results.jsonl]
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Number of processors to use [default: detected CPU count]
    #[arg(short = 'n', long)]
    pub num_procs: Option<u32>,

    /// Maximum number of processors of the machine
    #[arg(short = 'N', long)]
    pub max_procs: Option<u32>,

    /// Number of devices (e.g. GPUs) to use
    #[arg(long)]
    pub num_devices: Option<u32>,

    /// Maximum number of devices of the machine
    #[arg(long)]
    pub max_devices: Option<u32>,

    /// Submits the tests through a batch queue instead of running them directly
    #[arg(long)]
    pub batch: bool,

    /// Batch system used with `--batch`
    #[arg(long, value_enum)]
    pub batch_system: Option<BatchSystem>,

    /// Maximum number of concurrently submitted batch jobs
    #[arg(long)]
    pub qsub_limit: Option<u32>,

    /// Summed test timeout at which a batch job is closed
    #[arg(long, value_parser = parse_hms_or_human_time)]
    pub batch_length: Option<Duration>,

    /// Queue time used for every batch job
    #[arg(long, value_parser = parse_hms_or_human_time)]
    pub walltime: Option<Duration>,

    /// Batch queue (partition)
    #[arg(long)]
    pub queue: Option<String>,

    /// Batch account
    #[arg(long)]
    pub account: Option<String>,

    /// Processor cores of one compute node
    #[arg(long)]
    pub cores_per_node: Option<u32>,

    /// Devices of one compute node
    #[arg(long)]
    pub devices_per_node: Option<u32>,

    /// Time between polls of running tests
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub poll_interval: Duration,
}

#[derive(Parser)]
pub struct RunJobOpts {
    /// Job file written by the batch driver
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub job_file: PathBuf,
}
