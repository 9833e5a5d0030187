#[macro_use]
pub mod common;

pub mod resources;
pub mod results;
pub mod scheduler;
pub mod testset;

#[cfg(test)]
pub(crate) mod tests;
