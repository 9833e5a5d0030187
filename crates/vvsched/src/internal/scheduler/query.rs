/// Answers whether enough resources are currently free to start a test.
pub trait ResourceQuery {
    fn query_procs(&self, count: u32) -> bool;
    fn query_devices(&self, count: u32) -> bool;
}
