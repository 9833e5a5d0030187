use std::time::Duration;

use vvsched::TestId;
use vvsched::scheduler::ExecutionScheduler;
use vvsched::testset::{TestGraph, TestSize};

/// Queue time of a job whose tests have no timeout.
pub const NO_TIMEOUT_QUEUE_TIME: Duration = Duration::from_secs(21 * 60 * 60);

pub const DEFAULT_BATCH_LENGTH: Duration = Duration::from_secs(30 * 60);

/// Tests that are submitted together as one batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub tests: Vec<TestId>,
    pub size: TestSize,
    /// Summed timeouts of the tests
    pub time_sum: Duration,
    order: u32,
}

impl TestGroup {
    fn new(size: TestSize, time_sum: Duration, order: u32) -> Self {
        TestGroup {
            tests: Vec::new(),
            size,
            time_sum,
            order,
        }
    }

    fn sort_key(&self) -> (Duration, u32, u32, u32) {
        (self.time_sum, self.size.np, self.size.devices(), self.order)
    }
}

/// Packs tests into batch jobs.
pub struct BatchTestGrouper {
    batch_length: Duration,
    groups: Vec<TestGroup>,
    current: Option<TestGroup>,
    counter: u32,
}

impl BatchTestGrouper {
    pub fn new(batch_length: Option<Duration>) -> Self {
        BatchTestGrouper {
            batch_length: batch_length.unwrap_or(DEFAULT_BATCH_LENGTH),
            groups: Vec::new(),
            current: None,
            counter: 0,
        }
    }

    /// Takes every test out of the scheduler backlog and returns the jobs, largest first.
    ///
    /// Tests with dependencies and tests without a timeout get a job of their own. Other
    /// tests of equal size are packed together until their summed timeout would exceed
    /// the batch length.
    pub fn construct(
        mut self,
        scheduler: &mut ExecutionScheduler,
        graph: &TestGraph,
    ) -> Vec<TestGroup> {
        scheduler.sort_by_size_and_timeout(graph);
        while let Some(id) = scheduler.get_next_test() {
            self.add_test(id, graph);
        }
        if let Some(group) = self.current.take() {
            self.groups.push(group);
        }

        let mut groups = self.groups;
        groups.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        groups
    }

    fn add_test(&mut self, id: TestId, graph: &TestGraph) {
        let test = graph.test(id);
        let timeout = test.timeout.unwrap_or_default();
        let size = TestSize::new(test.size.np, Some(test.size.devices()));

        if test.num_dependencies() > 0 {
            let time = if timeout.as_secs() < 1 {
                NO_TIMEOUT_QUEUE_TIME
            } else {
                timeout
            };
            self.push_single(id, size, time);
        } else if timeout.as_secs() < 1 {
            self.push_single(id, size, NO_TIMEOUT_QUEUE_TIME);
        } else {
            let needs_new = match &self.current {
                Some(group) => {
                    group.size != size || group.time_sum + timeout > self.batch_length
                }
                None => true,
            };
            if needs_new {
                let order = self.next_order();
                let group = TestGroup::new(size, Duration::ZERO, order);
                if let Some(previous) = self.current.replace(group) {
                    self.groups.push(previous);
                }
            }
            if let Some(group) = &mut self.current {
                group.tests.push(id);
                group.time_sum += timeout;
            }
        }
    }

    fn push_single(&mut self, id: TestId, size: TestSize, time: Duration) {
        let order = self.next_order();
        let mut group = TestGroup::new(size, time, order);
        group.tests.push(id);
        self.groups.push(group);
    }

    fn next_order(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }
}

/// Time requested from the queue for a job running the given tests.
pub fn compute_queue_time(
    tests: &[TestId],
    graph: &TestGraph,
    max_timeout: Option<Duration>,
) -> Duration {
    let total: u64 = tests
        .iter()
        .map(|id| graph.test(*id).timeout.unwrap_or_default().as_secs())
        .sum();
    let qtime = if total == 0 {
        NO_TIMEOUT_QUEUE_TIME
    } else {
        apply_queue_timeout_bump_factor(Duration::from_secs(total))
    };
    match max_timeout {
        Some(max) if !max.is_zero() => qtime.min(max),
        _ => qtime,
    }
}

/// Adds queue overhead to the summed test time; the overhead never exceeds 15 minutes.
pub fn apply_queue_timeout_bump_factor(qtime: Duration) -> Duration {
    const MINUTE: u64 = 60;
    let secs = qtime.as_secs();
    let overhead = if secs < MINUTE {
        MINUTE
    } else if secs < 10 * MINUTE {
        secs
    } else {
        let base = secs.min(30 * MINUTE) - 10 * MINUTE;
        (15 * MINUTE).min(10 * MINUTE + base * 3 / 10)
    };
    Duration::from_secs(secs + overhead)
}

/// Timeout forced on the test of a single-test job, so it ends before the queue kills it.
pub fn single_test_timeout(qtime: Duration) -> Duration {
    if qtime < Duration::from_secs(600) {
        qtime * 9 / 10
    } else {
        qtime - Duration::from_secs(120)
    }
}
