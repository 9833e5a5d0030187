use crate::internal::common::Set;
use crate::internal::common::ids::TestId;
use crate::internal::results::ResultsSink;
use crate::internal::scheduler::backlog::Backlog;
use crate::internal::scheduler::query::ResourceQuery;
use crate::internal::testset::graph::TestGraph;
use crate::internal::testset::status::TestState;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulePartition {
    Backlog,
    Waiting,
    Started,
    Stopped,
}

/// Test that was left in the backlog when the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotRunTest {
    pub id: TestId,
    pub reason: String,
}

/// Decides the order in which tests are executed.
///
/// Every scheduled test lives in exactly one partition. Tests move only forward:
/// backlog -> waiting -> started -> stopped, a test may also go from waiting directly
/// to stopped.
#[derive(Default, Debug)]
pub struct ExecutionScheduler {
    backlog: Backlog,
    waiting: Set<TestId>,
    started: Set<TestId>,
    stopped: Set<TestId>,
}

impl ExecutionScheduler {
    /// Puts every test that is not skipped into the backlog, orders each size bucket by
    /// the previous runtime (longest first) and connects dependencies.
    pub fn build(graph: &mut TestGraph) -> Self {
        let mut scheduler = ExecutionScheduler::default();
        for test in graph.tests() {
            if test.is_skipped() {
                log::debug!("Test {} skipped: {}", test.name, test.skip.as_deref().unwrap_or(""));
                continue;
            }
            scheduler.backlog.insert(test.size.np, test.id);
        }
        let view: &TestGraph = graph;
        scheduler.sort_by(view, |id| view.test(id).runtime);
        graph.connect_dependencies();
        scheduler
    }

    /// Reorders the backlog by timeout (longest first), used when grouping tests into batch jobs.
    pub fn sort_by_size_and_timeout(&mut self, graph: &TestGraph) {
        self.sort_by(graph, |id| graph.test(id).timeout);
    }

    fn sort_by<F>(&mut self, graph: &TestGraph, key: F)
    where
        F: Fn(TestId) -> Option<Duration>,
    {
        self.backlog.sort_buckets(|a, b| {
            let ka = key(a).unwrap_or_default();
            let kb = key(b).unwrap_or_default();
            kb.cmp(&ka)
                .then_with(|| graph.test(a).name.cmp(&graph.test(b).name))
        });
    }

    /// Selects the next test to run and moves it into the waiting partition.
    ///
    /// Size buckets are visited from the largest processor count down; buckets and tests
    /// that do not fit the currently free resources are skipped. A test with a blocking
    /// dependency is never selected. When nothing fits and no test is running, the
    /// resource constraint is dropped so that a test larger than the machine still runs.
    pub fn pop_next(
        &mut self,
        graph: &TestGraph,
        query: Option<&dyn ResourceQuery>,
    ) -> Option<TestId> {
        let mut selected = self.select(graph, query);
        if selected.is_none() && query.is_some() && self.started.is_empty() {
            selected = self.select(graph, None);
            if let Some(id) = selected {
                log::debug!(
                    "Test {} does not fit into free resources, starting it anyway",
                    graph.test(id).name
                );
            }
        }
        if let Some(id) = selected {
            self.waiting.insert(id);
        }
        selected
    }

    fn select(&mut self, graph: &TestGraph, query: Option<&dyn ResourceQuery>) -> Option<TestId> {
        self.backlog.take_first(
            |np| query.is_none_or(|q| q.query_procs(np)),
            |id| {
                let test = graph.test(id);
                let fits = query.is_none_or(|q| {
                    let devices = test.size.devices();
                    devices == 0 || q.query_devices(devices)
                });
                fits && !graph.is_blocked(id)
            },
        )
    }

    /// Takes the next test regardless of resources and dependencies.
    pub fn get_next_test(&mut self) -> Option<TestId> {
        let id = self.backlog.take_first(|_| true, |_| true)?;
        self.waiting.insert(id);
        Some(id)
    }

    pub fn mark_started(&mut self, id: TestId) -> bool {
        if self.waiting.remove(&id) {
            self.started.insert(id);
            true
        } else {
            false
        }
    }

    /// Moves the test into the stopped partition and reports its result.
    ///
    /// Returns false (and reports nothing) when the test was not waiting or running,
    /// so calling it twice for the same test is harmless.
    pub fn mark_done(
        &mut self,
        id: TestId,
        graph: &TestGraph,
        results: &mut dyn ResultsSink,
    ) -> bool {
        if !(self.started.remove(&id) || self.waiting.remove(&id)) {
            return false;
        }
        self.stopped.insert(id);
        results.append_result(graph.test(id));
        true
    }

    /// Applies a state reported from outside (e.g. read from a batch job results file).
    ///
    /// Returns true if the test moved to another partition.
    pub fn check_state_change(
        &mut self,
        id: TestId,
        reported: &TestState,
        graph: &mut TestGraph,
        results: &mut dyn ResultsSink,
    ) -> bool {
        let partition = if self.waiting.contains(&id) {
            SchedulePartition::Waiting
        } else if self.started.contains(&id) {
            SchedulePartition::Started
        } else {
            return false;
        };

        match (partition, reported) {
            (SchedulePartition::Waiting, TestState::Running { .. }) => {
                self.waiting.remove(&id);
                self.started.insert(id);
                let test = graph.test_mut(id);
                test.state = reported.clone();
                results.test_started(test);
                true
            }
            (_, TestState::Done { .. }) => {
                graph.test_mut(id).state = reported.clone();
                self.mark_done(id, graph, results)
            }
            _ => false,
        }
    }

    /// Empties the backlog, returning each remaining test with the reason it could not run.
    pub fn pop_remaining(&mut self, graph: &TestGraph) -> Vec<NotRunTest> {
        let remaining = self.backlog.drain();
        remaining
            .into_iter()
            .map(|id| {
                self.stopped.insert(id);
                NotRunTest {
                    id,
                    reason: graph
                        .blocked_reason(id)
                        .unwrap_or_else(|| "not run".to_string()),
                }
            })
            .collect()
    }

    pub fn partition_of(&self, id: TestId) -> Option<SchedulePartition> {
        if self.waiting.contains(&id) {
            Some(SchedulePartition::Waiting)
        } else if self.started.contains(&id) {
            Some(SchedulePartition::Started)
        } else if self.stopped.contains(&id) {
            Some(SchedulePartition::Stopped)
        } else if self.backlog.contains(id) {
            Some(SchedulePartition::Backlog)
        } else {
            None
        }
    }

    /// Ids of the started tests, in ascending order.
    pub fn running(&self) -> Vec<TestId> {
        let mut ids: Vec<TestId> = self.started.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn waiting(&self) -> Vec<TestId> {
        let mut ids: Vec<TestId> = self.waiting.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn num_backlog(&self) -> usize {
        self.backlog.len()
    }

    #[inline]
    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    #[inline]
    pub fn num_running(&self) -> usize {
        self.started.len()
    }

    #[inline]
    pub fn num_done(&self) -> usize {
        self.stopped.len()
    }

    /// Number of tests handled by this scheduler (all partitions).
    pub fn num_total(&self) -> usize {
        self.backlog.len() + self.waiting.len() + self.started.len() + self.stopped.len()
    }

    pub fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.waiting.is_empty() && self.started.is_empty()
    }
}

impl std::fmt::Display for SchedulePartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulePartition::Backlog => "backlog",
            SchedulePartition::Waiting => "waiting",
            SchedulePartition::Started => "started",
            SchedulePartition::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
