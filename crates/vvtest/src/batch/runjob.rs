use std::path::Path;

use vvsched::testset::TestGraph;

use crate::batch::script::JobFile;
use crate::exec::direct::{DirectOptions, run_direct};
use crate::exec::launcher::LocalLauncher;
use crate::platform::Platform;
use crate::testlist::results::{ResultsFile, ResultsSummary};

/// Executes the tests of a batch job file on the resources of the job.
///
/// This is the program started by a job script; results are written into the results
/// file of the job, which is read by the batch driver.
pub async fn run_job(job_file: &Path) -> crate::Result<ResultsSummary> {
    let job = JobFile::load(job_file)?;
    log::info!(
        "Running batch job {} with {} tests on {} processors",
        job.batch_id,
        job.tests.len(),
        job.num_procs
    );

    let mut graph = TestGraph::new();
    for test in job.tests {
        graph.add(test)?;
    }
    let platform = Platform::new(
        job.num_procs,
        job.num_procs,
        job.num_devices.map(|num| (num, num)),
    );
    let mut launcher = LocalLauncher::new(job.test_root);
    let mut results = ResultsFile::create(&job.results_file, graph.len())?;

    let summary = run_direct(
        &mut graph,
        platform,
        &mut launcher,
        &mut results,
        &DirectOptions::default(),
    )
    .await?;
    if summary.interrupted {
        log::warn!("Batch job {} interrupted", job.batch_id);
    }
    Ok(ResultsSummary::from_graph(&graph))
}
