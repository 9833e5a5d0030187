use std::time::{Duration, Instant, SystemTime};

use vvsched::scheduler::{ExecutionScheduler, NotRunTest};
use vvsched::testset::TestGraph;
use vvsched::{Map, ResultsSink, TestId};

use crate::exec::launcher::{ProcessLauncher, RunningProcess};
use crate::exec::{format_elapsed, format_progress, sleep_or_interrupt};
use crate::platform::{Platform, ResourceHandle};

#[derive(Debug, Clone)]
pub struct DirectOptions {
    /// Sleep between two polls of the running tests
    pub poll_interval: Duration,
    /// Interval of the "still running" status messages
    pub status_interval: Duration,
}

impl Default for DirectOptions {
    fn default() -> Self {
        DirectOptions {
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Default)]
pub struct DirectRunSummary {
    /// Tests that stayed in the backlog, with the reason.
    pub not_run: Vec<NotRunTest>,
    /// Tests whose process could not be started.
    pub launch_failures: Vec<NotRunTest>,
    pub interrupted: bool,
}

struct RunningTest {
    process: Box<dyn RunningProcess>,
    resources: ResourceHandle,
    started_at: Instant,
}

struct DirectRunner<'a> {
    graph: &'a mut TestGraph,
    scheduler: ExecutionScheduler,
    platform: Platform,
    launcher: &'a mut dyn ProcessLauncher,
    results: &'a mut dyn ResultsSink,
    options: &'a DirectOptions,
    running: Map<TestId, RunningTest>,
    launch_failures: Vec<NotRunTest>,
    total: usize,
    start: Instant,
    last_status: Instant,
}

/// Runs all tests of the graph as local processes, as many at once as the platform allows.
///
/// The results sink is finalized before returning, also when the run was interrupted.
pub async fn run_direct(
    graph: &mut TestGraph,
    platform: Platform,
    launcher: &mut dyn ProcessLauncher,
    results: &mut dyn ResultsSink,
    options: &DirectOptions,
) -> crate::Result<DirectRunSummary> {
    let scheduler = ExecutionScheduler::build(graph);
    let total = scheduler.num_total();
    log::info!(
        "Running {total} tests with {} processors",
        platform.num_procs()
    );

    let mut runner = DirectRunner {
        graph,
        scheduler,
        platform,
        launcher,
        results,
        options,
        running: Map::new(),
        launch_failures: Vec::new(),
        total,
        start: Instant::now(),
        last_status: Instant::now(),
    };
    let interrupted = runner.run_loop().await;
    runner.finish(interrupted)
}

impl DirectRunner<'_> {
    /// Returns true if the run was interrupted.
    async fn run_loop(&mut self) -> bool {
        while !self.scheduler.is_idle() {
            if let Some(id) = self.scheduler.pop_next(self.graph, Some(&self.platform)) {
                self.start_test(id);
            } else if self.scheduler.num_running() == 0 {
                break;
            } else {
                self.print_status_if_due();
                if sleep_or_interrupt(self.options.poll_interval).await {
                    return true;
                }
            }
            self.check_running();
        }
        false
    }

    fn start_test(&mut self, id: TestId) {
        let test = self.graph.test(id);
        let resources = self.platform.obtain(&test.size);
        match self.launcher.launch(test, &resources) {
            Ok(process) => {
                self.scheduler.mark_started(id);
                let test = self.graph.test_mut(id);
                test.set_running(SystemTime::now());
                log::info!("Starting: {}", test.name);
                self.results.test_started(test);
                self.running.insert(
                    id,
                    RunningTest {
                        process,
                        resources,
                        started_at: Instant::now(),
                    },
                );
            }
            Err(error) => {
                log::error!("Cannot start test {}: {error:#}", test.name);
                self.platform.release(&resources);
                self.scheduler.mark_done(id, self.graph, self.results);
                self.launch_failures.push(NotRunTest {
                    id,
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    fn check_running(&mut self) {
        for id in self.scheduler.running() {
            let finished = self
                .running
                .get_mut(&id)
                .and_then(|running| running.process.poll());
            let Some(exit) = finished else {
                continue;
            };
            let Some(running) = self.running.remove(&id) else {
                continue;
            };
            self.platform.release(&running.resources);

            let (result, exit_status) = exit.to_result();
            let runtime = running.started_at.elapsed();
            let test = self.graph.test_mut(id);
            test.set_done(result, runtime, exit_status);
            log::info!(
                "Finished: {} {} ({})",
                test.name,
                test.result_status(),
                format_elapsed(runtime)
            );
            self.scheduler.mark_done(id, self.graph, self.results);
            log::info!(
                "Progress: {}, time = {}",
                format_progress(self.scheduler.num_done(), self.total),
                format_elapsed(self.start.elapsed())
            );
        }
    }

    fn print_status_if_due(&mut self) {
        if self.last_status.elapsed() < self.options.status_interval {
            return;
        }
        self.last_status = Instant::now();
        let names: Vec<&str> = self
            .scheduler
            .running()
            .into_iter()
            .map(|id| self.graph.test(id).name.as_str())
            .collect();
        log::info!(
            "Still running ({}): {}, backlog = {}",
            format_elapsed(self.start.elapsed()),
            names.join(", "),
            self.scheduler.num_backlog()
        );
    }

    fn finish(mut self, interrupted: bool) -> crate::Result<DirectRunSummary> {
        if interrupted {
            log::warn!(
                "Run interrupted, stopping {} running tests",
                self.running.len()
            );
            for (_, mut running) in self.running.drain() {
                running.process.kill();
                self.platform.release(&running.resources);
            }
        }

        let not_run = self.scheduler.pop_remaining(self.graph);
        for test in &not_run {
            log::warn!(
                "test \"{}\" notrun due to \"{}\"",
                self.graph.test(test.id).name,
                test.reason
            );
        }
        self.results.postrun(self.graph)?;

        Ok(DirectRunSummary {
            not_run,
            launch_failures: self.launch_failures,
            interrupted,
        })
    }
}
