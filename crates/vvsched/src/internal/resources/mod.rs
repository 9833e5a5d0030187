pub mod pool;

pub use pool::ResourcePool;
