#[macro_use]
pub mod internal;

pub use crate::internal::common::ids::{GroupId, ResourceIndex, TestId};
pub use crate::internal::common::{Map, Set};
pub use crate::internal::results::ResultsSink;

pub type Error = internal::common::error::SchedError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod resources {
    pub use crate::internal::resources::ResourcePool;
    pub use crate::internal::resources::pool::ResourceIndices;
}

pub mod scheduler {
    pub use crate::internal::scheduler::{
        ExecutionScheduler, NotRunTest, ResourceQuery, SchedulePartition,
    };
}

pub mod testset {
    pub use crate::internal::testset::dependency::FAILED_MATCH_REASON;
    pub use crate::internal::testset::status::DIFF_EXIT_STATUS;
    pub use crate::internal::testset::{
        DependencyPolicy, DependencySpec, ResultStatus, TestCase, TestDependency, TestGraph,
        TestResult, TestSize, TestState,
    };
}
