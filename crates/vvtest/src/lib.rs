pub mod batch;
pub mod common;
pub mod config;
pub mod exec;
pub mod platform;
pub mod testlist;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::VvError;
pub type Result<T> = std::result::Result<T, Error>;

pub const VVTEST_VERSION: &str = env!("CARGO_PKG_VERSION");
