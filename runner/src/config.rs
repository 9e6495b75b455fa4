use crate::warehouse::{sql, FaultConfig};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    Preflight,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    // settings of the benchmark sweep, individual runs are derived from these
    #[serde(default)]
    pub benchmark: SweepConfig,
    #[serde(default)]
    pub report: ReportConfig,
    // persist every run into a local SQLite file when set
    #[serde(default)]
    pub results: Option<ResultsConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Service account used for every connection
#[derive(Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub account_name: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            account_name: account_name.into(),
        }
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("account_name", &self.account_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("account_name", &self.account_name)
            .finish()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Sqlite {
        #[serde(default = "default_warehouse_path")]
        path: PathBuf,
    },
    Memory {
        #[serde(default)]
        latency_ms: u64,
        #[serde(default)]
        faults: FaultConfig,
    },
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_warehouse_path(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ProvisionConfig {
    pub start_index: usize,
    pub count: usize,
    // width of the provisioning pool, each worker holds its own connection
    pub workers: usize,
    pub tables: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            start_index: 1,
            count: 1000,
            workers: 10,
            tables: 100,
        }
    }
}

impl ProvisionConfig {
    /// Indices provisioned from `start_index`, `None` if the range overflows
    pub fn indices(&self) -> Option<std::ops::Range<usize>> {
        let end = self.start_index.checked_add(self.count)?;

        Some(self.start_index..end)
    }

    /// Databases a sweep would sample that provisioning does not create
    pub fn uncovered_sweep(&self, sweep: &[usize]) -> Option<usize> {
        let indices = self.indices()?;
        let largest = *sweep.iter().max()?;

        (!(indices.contains(&1) && indices.contains(&largest))).then_some(largest)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SweepConfig {
    pub engine: String,
    pub queries: usize,
    pub iterations: usize,
    // null disables the fixed DDL half of the sweep
    pub fixed_ddl_database: Option<String>,
    pub sweep: Vec<usize>,
    pub seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            engine: "benchmark_engine".to_owned(),
            queries: 3,
            iterations: 100,
            fixed_ddl_database: Some(sql::database_name(1000)),
            sweep: vec![1, 10, 100, 1000],
            seed: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResultsConfig {
    #[serde(default = "default_results_path")]
    pub path: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("benchmark.log")),
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path)?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the whole config and log every problem found
    ///
    /// Returns `true` if at least one error was found. Missing credentials are
    /// not an error here, the provisioner and the connection provider refuse
    /// to work without them on their own.
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if !self.credentials.is_complete() {
            warn!(
                "Credentials are missing {}, every connection will be refused",
                self.credentials.missing_fields().join(", ")
            );
        }

        if self.provision.workers == 0 {
            error!("provision.workers must be at least 1");
            contains_error = true;
        }

        if self.provision.tables == 0 {
            error!("provision.tables must be at least 1");
            contains_error = true;
        }

        let benchmark = &mut self.benchmark;

        if benchmark.queries == 0 {
            error!("benchmark.queries must be at least 1");
            contains_error = true;
        }

        if benchmark.iterations == 0 {
            error!("benchmark.iterations must be at least 1");
            contains_error = true;
        }

        if benchmark.sweep.is_empty() {
            error!("benchmark.sweep is empty, there is nothing to run");
            contains_error = true;
        } else if benchmark.sweep.contains(&0) {
            error!("benchmark.sweep cannot contain a pool of 0 databases");
            contains_error = true;
        }

        if benchmark.engine.trim().is_empty() {
            error!("benchmark.engine cannot be empty");
            contains_error = true;
        } else if benchmark.engine == sql::SYSTEM_ENGINE {
            error!(
                "benchmark.engine cannot be the system engine '{}'",
                sql::SYSTEM_ENGINE
            );
            contains_error = true;
        }

        // an empty name means the same as no fixed database
        if benchmark
            .fixed_ddl_database
            .as_ref()
            .is_some_and(|name| name.trim().is_empty())
        {
            warn!("benchmark.fixed_ddl_database is empty, only local DDL runs will be made");
            benchmark.fixed_ddl_database = None;
        }

        let Some(indices) = self.provision.indices() else {
            error!("provision.start_index + provision.count exceeds the largest database index");
            return true;
        };

        if let Some(fixed) = benchmark.fixed_ddl_database.as_ref() {
            if !sql::database_index(fixed).is_some_and(|index| indices.contains(&index)) {
                warn!("benchmark.fixed_ddl_database {fixed} is not part of the provisioned range, it has to exist already");
            }
        }

        // the runner samples test_database_1..=n
        if let Some(largest) = self.provision.uncovered_sweep(&benchmark.sweep) {
            warn!("benchmark.sweep samples up to {largest} databases but provisioning does not cover all of them");
        }

        contains_error
    }
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("warehouse")
}

fn default_results_path() -> PathBuf {
    PathBuf::from("tenbench.db")
}
