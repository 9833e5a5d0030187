use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use vvsched::scheduler::{ExecutionScheduler, NotRunTest};
use vvsched::testset::{TestGraph, TestSize};
use vvsched::{ResultsSink, TestId};

use crate::batch::grouper::{BatchTestGrouper, compute_queue_time, single_test_timeout};
use crate::batch::job::{BatchId, BatchJobHandler, JobResult, scan_batch_output};
use crate::batch::script::{BatchFileNamer, JobFile, ScriptSettings, build_job_script};
use crate::batch::{BatchBackend, JobScript, compute_node_count};
use crate::config::RunConfig;
use crate::exec::{format_elapsed, format_progress, sleep_or_interrupt};
use crate::testlist::results::read_results_file;

/// Longest uninterrupted sleep of the batch loop.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub test_root: PathBuf,
    /// Maximum number of jobs in the queue at once
    pub qsub_limit: usize,
    pub sleep: Duration,
    pub batch_length: Duration,
    pub max_timeout: Option<Duration>,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub settle_time: Duration,
    pub status_interval: Duration,
    pub script: ScriptSettings,
    pub cores_per_node: Option<u32>,
    pub devices_per_node: Option<u32>,
}

impl BatchOptions {
    pub fn from_config(config: &RunConfig) -> crate::Result<Self> {
        let exe = std::env::current_exe().context("Cannot get vvtest path")?;
        let batch = &config.batch;
        Ok(BatchOptions {
            test_root: config.test_root.clone(),
            qsub_limit: batch.qsub_limit.max(1) as usize,
            sleep: batch.sleep,
            batch_length: batch.batch_length,
            max_timeout: batch.max_timeout,
            check_interval: batch.check_interval,
            check_timeout: batch.check_timeout,
            settle_time: batch.settle_time,
            status_interval: config.status_interval,
            script: ScriptSettings {
                job_command: vec![exe.display().to_string(), "run-job".to_string()],
                walltime: batch.walltime,
                shim: batch.shim.clone(),
                env: batch.env.clone(),
            },
            cores_per_node: config.platform.cores_per_node,
            devices_per_node: config.platform.devices_per_node,
        })
    }
}

#[derive(Debug, Default)]
pub struct BatchRunSummary {
    /// Jobs that were never submitted or did not seem to start
    pub not_started: Vec<BatchId>,
    /// Jobs that did not seem to finish
    pub not_finished: Vec<BatchId>,
    /// Tests of jobs that were never submitted, with the reason.
    pub not_run: Vec<NotRunTest>,
    pub interrupted: bool,
}

struct BatchRunner<'a> {
    graph: &'a mut TestGraph,
    scheduler: ExecutionScheduler,
    backend: &'a mut dyn BatchBackend,
    results: &'a mut dyn ResultsSink,
    options: &'a BatchOptions,
    namer: BatchFileNamer,
    jobs: BatchJobHandler,
    total: usize,
    start: Instant,
    last_status: Instant,
}

/// Runs all tests of the graph through a batch queue.
///
/// Tests are grouped into job scripts that call `vvtest run-job`. Jobs are submitted while
/// the number of queued jobs is below the limit; their results are read back from the job
/// results files. Jobs still in the queue when the run ends are cancelled and the results
/// sink is always finalized.
pub async fn run_batch(
    graph: &mut TestGraph,
    backend: &mut dyn BatchBackend,
    results: &mut dyn ResultsSink,
    options: &BatchOptions,
) -> crate::Result<BatchRunSummary> {
    let mut runner = BatchRunner::new(graph, backend, results, options);
    let interrupted = runner.run_loop().await;
    runner.finish(interrupted).await
}

fn remove_batch_directories(namer: &BatchFileNamer) {
    for dir in namer.batch_directories() {
        log::debug!("Removing {}", dir.display());
        if let Err(error) = std::fs::remove_dir_all(&dir) {
            log::warn!("Cannot remove directory {}: {error}", dir.display());
        }
    }
}

impl<'a> BatchRunner<'a> {
    fn new(
        graph: &'a mut TestGraph,
        backend: &'a mut dyn BatchBackend,
        results: &'a mut dyn ResultsSink,
        options: &'a BatchOptions,
    ) -> Self {
        let mut scheduler = ExecutionScheduler::build(graph);
        let total = scheduler.num_total();
        let namer = BatchFileNamer::new(&options.test_root);
        remove_batch_directories(&namer);

        let mut jobs = BatchJobHandler::new(
            options.check_interval,
            options.check_timeout,
            options.settle_time,
        );
        let groups =
            BatchTestGrouper::new(Some(options.batch_length)).construct(&mut scheduler, graph);
        for group in groups {
            let size = TestSize::new(group.size.np, group.size.ndevice.filter(|d| *d > 0));
            jobs.create_job(group.tests, size, &namer);
        }
        log::info!(
            "Running {total} tests in {} batch jobs using {}, maximum concurrent batch jobs: {}",
            jobs.jobs().count(),
            backend.name(),
            options.qsub_limit
        );

        BatchRunner {
            graph,
            scheduler,
            backend,
            results,
            options,
            namer,
            jobs,
            total,
            start: Instant::now(),
            last_status: Instant::now(),
        }
    }

    /// Returns true if the run was interrupted.
    async fn run_loop(&mut self) -> bool {
        loop {
            if self.check_start().await.is_none() {
                if self.jobs.num_in_progress() == 0 {
                    return false;
                }
                if self.sleep().await {
                    return true;
                }
            }
            self.check_done().await;
        }
    }

    async fn sleep(&mut self) -> bool {
        let mut remaining = self.options.sleep;
        loop {
            self.print_status_if_due();
            let slice = remaining.min(SLEEP_SLICE);
            if sleep_or_interrupt(slice).await {
                return true;
            }
            remaining = remaining.saturating_sub(slice);
            if remaining.is_zero() {
                return false;
            }
        }
    }

    /// Submits the first job that has no blocked test, if the queue limit allows it.
    async fn check_start(&mut self) -> Option<BatchId> {
        if self.jobs.num_submitted() >= self.options.qsub_limit {
            return None;
        }
        let id = self.jobs.not_started().into_iter().find(|id| {
            self.jobs
                .job(*id)
                .tests
                .iter()
                .all(|test| !self.graph.is_blocked(*test))
        })?;
        self.start_job(id).await;
        Some(id)
    }

    async fn start_job(&mut self, id: BatchId) {
        let job_script = match self.write_job(id) {
            Ok(job_script) => job_script,
            Err(error) => {
                log::error!("Cannot write batch job {id}: {error}");
                self.jobs.mark_done(id, JobResult::NotRun);
                self.close_job_tests(id);
                return;
            }
        };
        let submitted = self.backend.submit(&job_script).await;
        match (submitted.job_id, submitted.error) {
            (Some(job_id), None) => {
                log::info!(
                    "Job script {} submitted with id {job_id}",
                    job_script.script.display()
                );
                self.jobs.mark_submitted(id, job_id, Instant::now());
            }
            (_, error) => {
                log::warn!(
                    "Submission of batch job {id} failed\n{}\n{}\n{}",
                    submitted.command,
                    submitted.output.trim(),
                    error.unwrap_or_default()
                );
                self.jobs.mark_done(id, JobResult::NotRun);
                self.close_job_tests(id);
            }
        }
    }

    fn write_job(&self, id: BatchId) -> crate::Result<JobScript> {
        let job = self.jobs.job(id);
        let qtime = compute_queue_time(&job.tests, self.graph, self.options.max_timeout);
        let single = job.tests.len() == 1;

        // dependencies were satisfied before the job was submitted
        let tests = job
            .tests
            .iter()
            .map(|test_id| {
                let mut test = self.graph.test(*test_id).clone();
                test.depends_on.clear();
                test.analyze = false;
                if single {
                    test.timeout = Some(single_test_timeout(qtime));
                }
                test
            })
            .collect();

        let (num_procs, num_devices) = match self.options.cores_per_node {
            Some(cores) => {
                let nodes = compute_node_count(&job.size, cores, self.options.devices_per_node).max(1);
                (
                    nodes * cores,
                    self.options
                        .devices_per_node
                        .map(|dpn| nodes * dpn)
                        .or(job.size.ndevice),
                )
            }
            None => (job.size.np.max(1), job.size.ndevice),
        };
        let job_file = JobFile {
            batch_id: id,
            test_root: self.options.test_root.clone(),
            results_file: job.files.results_file.clone(),
            num_procs,
            num_devices,
            tests,
        };

        std::fs::create_dir_all(self.namer.subdir(id))?;
        job_file.write(&job.files.job_file)?;
        let script = build_job_script(
            &*self.backend,
            &self.options.script,
            job,
            qtime,
            self.namer.root(),
        );
        std::fs::write(&job.files.script, script)?;
        Ok(JobScript {
            script: job.files.script.clone(),
            workdir: self.namer.root().to_path_buf(),
            outfile: job.files.outfile.clone(),
        })
    }

    /// Finds jobs that left the queue and reads the results of running and stopped jobs.
    async fn check_done(&mut self) {
        let mut finished_tests = Vec::new();
        let stopped = self.check_stopped_jobs(&mut finished_tests).await;
        if !stopped.is_empty() {
            let ids: Vec<String> = stopped.iter().map(|id| id.to_string()).collect();
            log::info!("Finished batch IDS: {}", ids.join(" "));
        }

        let now = Instant::now();
        for id in self.jobs.submitted() {
            if self.jobs.is_time_to_check(id, now) {
                self.read_job_results(id, &mut finished_tests);
                self.jobs.reset_check_time(id, now);
            }
        }
        for id in self.jobs.stopped() {
            if self.jobs.is_time_to_check(id, now) {
                self.check_job_finish(id, now, &mut finished_tests);
            }
        }

        for id in &finished_tests {
            let test = self.graph.test(*id);
            log::info!("Finished: {} {}", test.name, test.result_status());
        }
        if !finished_tests.is_empty() {
            log::info!(
                "Progress: {}, tests {}, time = {}",
                self.job_progress(),
                format_progress(self.scheduler.num_done(), self.total),
                format_elapsed(self.start.elapsed())
            );
        }
    }

    fn job_progress(&self) -> String {
        format!(
            "jobs running={} completed {}",
            self.jobs.num_in_progress(),
            format_progress(self.jobs.num_done(), self.jobs.jobs().count())
        )
    }

    async fn check_stopped_jobs(&mut self, finished_tests: &mut Vec<TestId>) -> Vec<BatchId> {
        let submitted = self.jobs.submitted();
        if submitted.is_empty() {
            return Vec::new();
        }
        for id in &submitted {
            self.jobs.check_outfile(*id);
        }

        let job_ids: Vec<_> = submitted
            .iter()
            .filter_map(|id| self.jobs.job(*id).job_id())
            .collect();
        // jobs missing from a failed query count as absent, the outfile and settle checks
        // still decide whether they stopped
        let query = self.backend.query(&job_ids).await;
        if let Some(error) = &query.error {
            log::warn!("Batch queue query `{}` failed: {error}", query.command);
        }

        let now = Instant::now();
        let mut stopped = Vec::new();
        for id in submitted {
            let state = match self.jobs.job(id).job_id() {
                Some(job_id) => query.state(job_id),
                None => continue,
            };
            if self.jobs.check_stopped(id, state, now) {
                self.read_job_results(id, finished_tests);
                stopped.push(id);
            }
        }
        stopped
    }

    fn check_job_finish(&mut self, id: BatchId, now: Instant, finished_tests: &mut Vec<TestId>) {
        let files = &self.jobs.job(id).files;
        let clean = scan_batch_output(&files.outfile)
            && read_results_file(&files.results_file).is_ok_and(|content| content.finished);
        if clean {
            self.read_job_results(id, finished_tests);
            self.jobs.mark_done(id, JobResult::Clean);
            self.close_job_tests(id);
        } else if !self.jobs.extend_finish_check(id, now) {
            self.force_job_finish(id, finished_tests);
        }
    }

    /// The job did not finish cleanly in time, decide from the files it left behind.
    fn force_job_finish(&mut self, id: BatchId, finished_tests: &mut Vec<TestId>) {
        let files = &self.jobs.job(id).files;
        let result = if !files.outfile.exists() {
            JobResult::NotRun
        } else if files.results_file.exists() {
            self.read_job_results(id, finished_tests);
            JobResult::NotDone
        } else {
            JobResult::Fail
        };
        log::debug!("Batch job {id} forced to finish as {result}");
        self.jobs.mark_done(id, result);
        self.close_job_tests(id);
    }

    /// Reports tests of a finished job that never reported a final state.
    fn close_job_tests(&mut self, id: BatchId) {
        for test_id in &self.jobs.job(id).tests {
            self.scheduler.mark_done(*test_id, self.graph, self.results);
        }
    }

    fn read_job_results(&mut self, id: BatchId, finished_tests: &mut Vec<TestId>) {
        let job = self.jobs.job(id);
        let path = &job.files.results_file;
        if !path.exists() {
            return;
        }
        let content = match read_results_file(path) {
            Ok(content) => content,
            Err(error) => {
                log::warn!("Cannot read job results file {}: {error}", path.display());
                return;
            }
        };
        for (test_id, state) in content.states {
            if !job.tests.contains(&test_id) {
                continue;
            }
            let changed =
                self.scheduler
                    .check_state_change(test_id, &state, self.graph, self.results);
            if changed && state.is_done() {
                finished_tests.push(test_id);
            }
        }
    }

    fn print_status_if_due(&mut self) {
        if self.last_status.elapsed() < self.options.status_interval {
            return;
        }
        self.last_status = Instant::now();
        let ids: Vec<String> = self
            .jobs
            .submitted()
            .into_iter()
            .filter_map(|id| self.jobs.job(id).job_id())
            .map(|job_id| job_id.to_string())
            .collect();
        log::info!(
            "Status ({}): jobs in queue = [{}], tests {}",
            format_elapsed(self.start.elapsed()),
            ids.join(" "),
            format_progress(self.scheduler.num_done(), self.total)
        );
    }

    async fn finish(mut self, interrupted: bool) -> crate::Result<BatchRunSummary> {
        if interrupted {
            log::warn!("Run interrupted");
        }
        let to_cancel: Vec<_> = self
            .jobs
            .submitted()
            .into_iter()
            .filter_map(|id| self.jobs.job(id).job_id())
            .collect();

        let not_run = self.flush();
        self.shutdown(to_cancel).await?;

        let (not_started, not_finished) = self.jobs.unfinished();
        if !not_started.is_empty() {
            log::warn!(
                "These batch numbers did not seem to start: {}",
                join_ids(&not_started)
            );
        }
        if !not_finished.is_empty() {
            log::warn!(
                "These batch numbers did not seem to finish: {}",
                join_ids(&not_finished)
            );
        }
        for test in &not_run {
            log::warn!(
                "test \"{}\" notrun due to \"{}\"",
                self.graph.test(test.id).name,
                test.reason
            );
        }

        Ok(BatchRunSummary {
            not_started,
            not_finished,
            not_run,
            interrupted,
        })
    }

    /// Closes every job that is not done and reports the final state of its tests.
    fn flush(&mut self) -> Vec<NotRunTest> {
        let mut not_run = Vec::new();
        for id in self.jobs.mark_not_started_done() {
            for test_id in &self.jobs.job(id).tests {
                let reason = self
                    .graph
                    .blocked_reason(*test_id)
                    .unwrap_or_else(|| format!("batch number {id} did not run"));
                not_run.push(NotRunTest {
                    id: *test_id,
                    reason,
                });
            }
        }
        for id in self.jobs.submitted().into_iter().chain(self.jobs.stopped()) {
            self.jobs.mark_done(id, JobResult::NotDone);
        }

        let mut remaining = self.scheduler.waiting();
        remaining.extend(self.scheduler.running());
        for id in remaining {
            self.scheduler.mark_done(id, self.graph, self.results);
        }
        not_run.extend(self.scheduler.pop_remaining(self.graph));
        not_run
    }

    async fn shutdown(&mut self, to_cancel: Vec<u64>) -> crate::Result<()> {
        if !to_cancel.is_empty() {
            log::info!("Cancelling {} batch jobs", to_cancel.len());
            let cancels = to_cancel.iter().map(|job_id| self.backend.cancel(*job_id));
            for (job_id, result) in to_cancel.iter().zip(join_all(cancels).await) {
                if let Err(error) = result {
                    log::warn!("Cannot cancel batch job {job_id}: {error:?}");
                }
            }
        }
        self.results.postrun(self.graph)?;
        Ok(())
    }
}

fn join_ids(ids: &[BatchId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
