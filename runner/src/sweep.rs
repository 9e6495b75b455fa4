use crate::{
    benchmark::{BenchmarkRunner, RunConfig},
    config::{BenchConfig, Credentials},
    store::ResultStore,
    warehouse::Warehouse,
};
use chrono::Utc;
use std::path::PathBuf;
use tenbench_analysis::{DdlMode, Reporter};
use tracing::{error, info, warn};

/// What a single (pool size, DDL mode) run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub num_databases: usize,
    pub mode: DdlMode,
    pub samples: usize,
    pub failed_iterations: usize,
    pub chart: Option<PathBuf>,
}

/// Runs benchmarks back to back and hands each result to the reporter and store
pub struct Experiment<'a, W: Warehouse> {
    runner: BenchmarkRunner<'a, W>,
    reporter: Reporter,
    store: Option<ResultStore>,
    queries: usize,
    iterations: usize,
}

impl<'a, W: Warehouse> Experiment<'a, W> {
    pub fn new(config: &BenchConfig, warehouse: &'a W, credentials: &'a Credentials) -> Self {
        let store = config
            .results
            .as_ref()
            .and_then(|results| match ResultStore::load(results) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!(
                        path = ?results.path,
                        "Failed to open results store, continuing without it: {e}"
                    );
                    None
                }
            });

        Self {
            runner: BenchmarkRunner::new(
                warehouse,
                credentials,
                config.benchmark.engine.clone(),
                config.provision.tables,
                config.benchmark.seed,
            ),
            reporter: Reporter::new(&config.report.output_dir),
            store,
            queries: config.benchmark.queries,
            iterations: config.benchmark.iterations,
        }
    }

    pub fn run_config(&self, num_databases: usize, fixed_ddl_database: Option<String>) -> RunConfig {
        RunConfig::new(num_databases, self.queries, fixed_ddl_database).with_iterations(self.iterations)
    }

    /// Benchmark, persist and report a single configuration
    pub fn execute(&mut self, run: &RunConfig) -> RunOutcome {
        let started_at = Utc::now();
        let result = self.runner.run_benchmark(run);

        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.store(&result, started_at) {
                error!("Failed to store run: {e}");
            }
        }

        let chart = self.reporter.report(&result);

        RunOutcome {
            num_databases: result.num_databases,
            mode: result.ddl_mode,
            samples: result.len(),
            failed_iterations: result.failed_iterations,
            chart,
        }
    }

    /// For every pool size run the fixed DDL variant, then the local one
    pub fn sweep(&mut self, sizes: &[usize], fixed_ddl_database: Option<&str>) -> Vec<RunOutcome> {
        if fixed_ddl_database.is_none() {
            warn!("No fixed DDL database configured, only local DDL runs will be made");
        }

        info!("Starting benchmark...");

        let mut outcomes = Vec::with_capacity(sizes.len() * 2);
        for &size in sizes {
            if let Some(fixed) = fixed_ddl_database {
                let run = self.run_config(size, Some(fixed.to_owned()));
                outcomes.push(self.execute(&run));
            }

            let run = self.run_config(size, None);
            outcomes.push(self.execute(&run));
        }

        info!("Finished sweep with {} runs", outcomes.len());

        outcomes
    }

    pub fn close(self) {
        if let Some(store) = self.store {
            if let Err(e) = store.close() {
                error!("Failed to close results store: {e}");
            }
        }
    }
}
