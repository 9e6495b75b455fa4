use crate::{
    config::Credentials,
    warehouse::{open_connection, sql, Connection, Warehouse, WarehouseError},
};
use chrono::Utc;
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;
use tenbench_analysis::{DdlMode, RunResult, TimingSample};
use tracing::{debug, error, info, instrument, warn};

pub const ITERATIONS: usize = 100;

/// Parameters of a single benchmark run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// reads sample uniformly from `test_database_1..=num_databases`
    pub num_databases: usize,
    pub num_queries: usize,
    /// database receiving the DDL, it has to be provisioned beforehand
    pub fixed_ddl_database: Option<String>,
    pub iterations: usize,
}

impl RunConfig {
    pub fn new(
        num_databases: usize,
        num_queries: usize,
        fixed_ddl_database: Option<String>,
    ) -> Self {
        Self {
            num_databases,
            num_queries,
            fixed_ddl_database,
            iterations: ITERATIONS,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// fixed DDL database, an empty name counts as none
    pub fn fixed_database(&self) -> Option<&str> {
        self.fixed_ddl_database
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn ddl_mode(&self) -> DdlMode {
        DdlMode::from_fixed_database(self.fixed_database())
    }
}

/// Lifecycle of a run, iterations have their own success state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    EngineReady,
    Iterating,
    EngineTornDown,
    Failed,
    Done,
}

/// Sequential benchmark loop over a single connection
///
/// Iterations run one after another on purpose, concurrent queries would
/// distort the measured latencies.
pub struct BenchmarkRunner<'a, W: Warehouse> {
    warehouse: &'a W,
    credentials: &'a Credentials,
    engine: String,
    tables: usize,
    rng: StdRng,
    phase: RunPhase,
}

impl<'a, W: Warehouse> BenchmarkRunner<'a, W> {
    pub fn new(
        warehouse: &'a W,
        credentials: &'a Credentials,
        engine: impl Into<String>,
        tables: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            warehouse,
            credentials,
            engine: engine.into(),
            tables,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            phase: RunPhase::Idle,
        }
    }

    /// phase reached by the last run
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "Run phase changed");
        self.phase = phase;
    }

    /// Run `config.iterations` timed iterations and collect their samples
    ///
    /// A failing iteration is logged and skipped. A failure while setting up
    /// or tearing down the engine fails the whole run, which then returns no
    /// samples at all.
    #[instrument(skip_all, fields(num_databases = config.num_databases, mode = %config.ddl_mode()))]
    pub fn run_benchmark(&mut self, config: &RunConfig) -> RunResult {
        let mut result = RunResult::new(config.num_databases, config.ddl_mode());
        self.transition(RunPhase::Idle);

        if config.num_databases == 0 || config.num_queries == 0 || self.tables == 0 {
            error!(
                "Refusing to benchmark {} queries over {} databases with {} tables",
                config.num_queries, config.num_databases, self.tables
            );
            self.transition(RunPhase::Failed);
            self.transition(RunPhase::Done);

            return result;
        }

        let mut connection = match open_connection(self.warehouse, self.credentials) {
            Ok(connection) => connection,
            Err(e) => {
                error!("Fatal benchmark error: {e}");
                self.transition(RunPhase::Failed);
                self.transition(RunPhase::Done);

                return result;
            }
        };

        if let Err(e) = self.run_with(&mut connection, config, &mut result) {
            error!("Fatal benchmark error: {e}");
            result.discard();
            self.transition(RunPhase::Failed);
        }

        if let Err(e) = connection.close() {
            warn!("Failed to close benchmark connection: {e}");
        }
        self.transition(RunPhase::Done);

        result
    }

    fn run_with(
        &mut self,
        connection: &mut W::Connection,
        config: &RunConfig,
        result: &mut RunResult,
    ) -> Result<(), WarehouseError> {
        info!("Creating benchmark engine...");
        connection.execute(&sql::create_engine(&self.engine))?;
        connection.execute(&sql::use_engine(&self.engine))?;
        info!("Benchmark engine created and selected");
        self.transition(RunPhase::EngineReady);

        self.transition(RunPhase::Iterating);
        for iteration in 0..config.iterations {
            let db_num = self.rng.gen_range(1..=config.num_databases);
            let table_num = self.rng.gen_range(0..self.tables);
            let database = sql::database_name(db_num);
            let table = sql::table_name(table_num);

            match run_iteration(connection, config, iteration, &database, &table) {
                Ok(samples) => {
                    let durations = samples
                        .iter()
                        .map(|sample| format!("Q{}: {:.2}ms", sample.query_num, sample.duration_ms))
                        .join(", ");
                    let ddl_info = config
                        .fixed_database()
                        .map(|fixed| format!(" (DDL in {fixed})"))
                        .unwrap_or_default();

                    info!(
                        "Benchmark {}/{}: {database}.{table}{ddl_info} - {durations}",
                        iteration + 1,
                        config.iterations
                    );
                    result.push_iteration(samples);
                }
                Err(e) => {
                    error!("Failed benchmark iteration {iteration}: {e}");
                    result.record_failure();
                }
            }
        }

        info!("Dropping benchmark engine...");
        connection.execute(&sql::use_engine(sql::SYSTEM_ENGINE))?;
        connection.execute(&sql::stop_engine(&self.engine))?;
        connection.execute(&sql::drop_engine(&self.engine))?;
        self.transition(RunPhase::EngineTornDown);
        info!("Benchmark engine dropped");

        Ok(())
    }
}

/// One DDL, read, cleanup cycle
///
/// Samples are only handed out once the whole cycle succeeded.
fn run_iteration<C: Connection>(
    connection: &mut C,
    config: &RunConfig,
    iteration: usize,
    database: &str,
    table: &str,
) -> Result<Vec<TimingSample>, WarehouseError> {
    let fixed = config.fixed_database();

    match fixed {
        Some(fixed) => {
            connection.execute(&sql::use_database(fixed))?;
            connection.execute(&sql::create_table(sql::DDL_MARKER_TABLE))?;
            connection.execute(&sql::use_database(database))?;
        }
        None => {
            connection.execute(&sql::use_database(database))?;
            connection.execute(&sql::create_table(sql::DDL_MARKER_TABLE))?;
        }
    }

    let select = sql::select_all(table);
    let mut samples = Vec::with_capacity(config.num_queries);

    for query_num in 0..config.num_queries {
        let start = Instant::now();
        connection.execute(&select)?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        samples.push(TimingSample {
            iteration,
            database: database.to_owned(),
            is_fixed_ddl: fixed.is_some(),
            table: table.to_owned(),
            duration_ms,
            timestamp: Utc::now(),
            query_num,
        });
    }

    if let Some(fixed) = fixed {
        connection.execute(&sql::use_database(fixed))?;
    }
    connection.execute(&sql::drop_table(sql::DDL_MARKER_TABLE))?;

    Ok(samples)
}
