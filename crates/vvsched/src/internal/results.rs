use crate::internal::testset::graph::TestGraph;
use crate::internal::testset::test_case::TestCase;

/// Receives test results as the scheduler stops tests.
///
/// The scheduler calls [`ResultsSink::append_result`] at most once per test and run.
pub trait ResultsSink {
    fn test_started(&mut self, _test: &TestCase) {}

    fn append_result(&mut self, test: &TestCase);

    /// Called once when the run ends, whatever the reason.
    fn postrun(&mut self, graph: &TestGraph) -> crate::Result<()>;
}
