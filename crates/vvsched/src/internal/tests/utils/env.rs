use crate::internal::results::ResultsSink;
use crate::internal::scheduler::{ExecutionScheduler, ResourceQuery};
use crate::internal::testset::{TestCase, TestGraph, TestResult};
use crate::TestId;
use std::time::Duration;

#[derive(Default)]
pub struct RecordingSink {
    pub started: Vec<TestId>,
    pub results: Vec<TestId>,
    pub postrun_calls: usize,
}

impl ResultsSink for RecordingSink {
    fn test_started(&mut self, test: &TestCase) {
        self.started.push(test.id);
    }

    fn append_result(&mut self, test: &TestCase) {
        self.results.push(test.id);
    }

    fn postrun(&mut self, _graph: &TestGraph) -> crate::Result<()> {
        self.postrun_calls += 1;
        Ok(())
    }
}

/// Fixed amount of free resources.
pub struct FreeResources {
    pub procs: u32,
    pub devices: u32,
}

impl ResourceQuery for FreeResources {
    fn query_procs(&self, count: u32) -> bool {
        count.max(1) <= self.procs
    }

    fn query_devices(&self, count: u32) -> bool {
        count <= self.devices
    }
}

pub struct TestEnv {
    pub graph: TestGraph,
    pub scheduler: ExecutionScheduler,
    pub sink: RecordingSink,
}

impl TestEnv {
    pub fn new(tests: Vec<TestCase>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut graph = TestGraph::new();
        for test in tests {
            graph.add(test).unwrap();
        }
        let scheduler = ExecutionScheduler::build(&mut graph);
        TestEnv {
            graph,
            scheduler,
            sink: RecordingSink::default(),
        }
    }

    pub fn id(&self, name: &str) -> TestId {
        self.graph.find_by_name(name).unwrap()
    }

    pub fn pop(&mut self) -> Option<String> {
        self.scheduler
            .pop_next(&self.graph, None)
            .map(|id| self.graph.test(id).name.clone())
    }

    pub fn pop_with(&mut self, free: &FreeResources) -> Option<String> {
        self.scheduler
            .pop_next(&self.graph, Some(free))
            .map(|id| self.graph.test(id).name.clone())
    }

    pub fn start(&mut self, name: &str) {
        let id = self.id(name);
        assert!(self.scheduler.mark_started(id));
        self.graph
            .test_mut(id)
            .set_running(std::time::SystemTime::now());
    }

    pub fn finish(&mut self, name: &str, result: TestResult) -> bool {
        let id = self.id(name);
        self.graph
            .test_mut(id)
            .set_done(result, Duration::from_secs(1), None);
        self.scheduler.mark_done(id, &self.graph, &mut self.sink)
    }

    /// Runs tests one by one until the scheduler has nothing more to offer.
    pub fn run_all(&mut self, result: TestResult) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(name) = self.pop() {
            self.start(&name);
            self.finish(&name, result);
            order.push(name);
        }
        order
    }
}
