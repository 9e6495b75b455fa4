pub mod benchmark;
pub mod config;
pub mod logging;
pub mod provision;
pub mod store;
pub mod sweep;
pub mod warehouse;

pub use tenbench_analysis as analysis;

#[cfg(test)]
mod benchmark_test;
