pub mod dependency;
pub mod graph;
pub mod status;
pub mod test_case;

pub use dependency::{DependencyPolicy, DependencySpec, TestDependency};
pub use graph::TestGraph;
pub use status::{ResultStatus, TestResult, TestState};
pub use test_case::{TestCase, TestSize};
