mod backlog;
pub mod execlist;
pub mod query;

pub use execlist::{ExecutionScheduler, NotRunTest, SchedulePartition};
pub use query::ResourceQuery;
