use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, fmt, ops::Deref};

/// Where the schema-modifying statement of an iteration is placed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DdlMode {
    /// DDL runs in one fixed database, reads target the random database
    Fixed,
    /// DDL and reads share the randomly chosen database
    Local,
}

impl DdlMode {
    /// an empty database name counts as no fixed database
    pub fn from_fixed_database(database: Option<&str>) -> Self {
        match database {
            Some(name) if !name.is_empty() => Self::Fixed,
            _ => Self::Local,
        }
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, Self::Fixed)
    }

    /// suffix used for artifact names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed_ddl",
            Self::Local => "local_ddl",
        }
    }
}

impl fmt::Display for DdlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single timed read query
#[derive(Clone, Debug, PartialEq)]
pub struct TimingSample {
    pub iteration: usize,
    pub database: String,
    pub is_fixed_ddl: bool,
    pub table: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub query_num: usize,
}

/// Ordered samples of one benchmark run
///
/// Samples are appended one complete iteration at a time, so a failed
/// iteration never leaves a partial block behind.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub num_databases: usize,
    pub ddl_mode: DdlMode,
    pub failed_iterations: usize,
    samples: Vec<TimingSample>,
}

impl RunResult {
    pub fn new(num_databases: usize, ddl_mode: DdlMode) -> Self {
        Self {
            num_databases,
            ddl_mode,
            failed_iterations: 0,
            samples: Vec::new(),
        }
    }

    /// append the samples of one completed iteration
    pub fn push_iteration(&mut self, samples: Vec<TimingSample>) {
        debug_assert!(samples
            .iter()
            .all(|sample| sample.is_fixed_ddl == self.ddl_mode.is_fixed()));

        self.samples.extend(samples);
    }

    pub fn record_failure(&mut self) {
        self.failed_iterations += 1;
    }

    /// drop everything collected so far, used when the run as a whole failed
    pub fn discard(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> &[TimingSample] {
        &self.samples
    }

    /// number of iterations that contributed samples
    pub fn completed_iterations(&self) -> usize {
        self.samples
            .iter()
            .map(|sample| sample.iteration)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl Deref for RunResult {
    type Target = [TimingSample];

    fn deref(&self) -> &Self::Target {
        &self.samples
    }
}
