pub mod chart;
pub mod report;
pub mod sample;
pub mod stats;

pub use report::Reporter;
pub use sample::{DdlMode, RunResult, TimingSample};
pub use stats::{group_by_query, QueryGroups, Summary};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Run contains no samples")]
    EmptyRun,
    #[error("Failed to prepare report output")]
    Io(#[from] std::io::Error),
    #[error("Failed to render chart: {0}")]
    Render(String),
}
