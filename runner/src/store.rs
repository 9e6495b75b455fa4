use crate::config::ResultsConfig;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tenbench_analysis::RunResult;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error")]
    SQLite(#[from] rusqlite::Error),
}

/// Local SQLite file receiving every finished run
#[derive(Debug)]
pub struct ResultStore {
    connection: Connection,
}

impl ResultStore {
    pub fn load(config: &ResultsConfig) -> Result<Self, StoreError> {
        let mut store = Self {
            connection: Connection::open(&config.path)?,
        };
        store.init()?;

        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let mut store = Self {
            connection: Connection::open_in_memory()?,
        };
        store.init()?;

        Ok(store)
    }

    fn init(&mut self) -> Result<(), StoreError> {
        for (counter, table) in SQL_SCHEMA.iter().enumerate() {
            match self.connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({}/{SQL_SCHEMA_NUMBER})", counter + 1),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({}/{SQL_SCHEMA_NUMBER}): {error}", counter + 1);

                    return Err(StoreError::SQLite(error));
                }
            };
        }

        Ok(())
    }

    /// Insert a run with all of its samples in one transaction
    pub fn store(&self, result: &RunResult, started_at: DateTime<Utc>) -> Result<i64, StoreError> {
        // NOTE: We can guarantee that no nested transactions are present due to only having one
        // connection at a time.
        let mut tx = self.connection.unchecked_transaction()?;
        tx.set_drop_behavior(rusqlite::DropBehavior::Rollback);

        tx.prepare_cached(
            "insert into runs
             (num_databases, ddl_mode, iterations, failed_iterations, started_at)
             values (?, ?, ?, ?, ?)",
        )?
        .execute(params![
            result.num_databases as i64,
            result.ddl_mode.as_str(),
            result.completed_iterations() as i64,
            result.failed_iterations as i64,
            started_at.to_rfc3339(),
        ])?;
        let run = tx.last_insert_rowid();

        {
            let mut insert = tx.prepare_cached(
                "insert into samples
                 (run, iteration, database, is_fixed_ddl, \"table\", duration_ms, timestamp, query_num)
                 values (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for sample in result.samples() {
                insert.execute(params![
                    run,
                    sample.iteration as i64,
                    sample.database,
                    sample.is_fixed_ddl,
                    sample.table,
                    sample.duration_ms,
                    sample.timestamp.to_rfc3339(),
                    sample.query_num as i64,
                ])?;
            }
        }
        tx.commit()?;

        info!(run = run, "Stored {} samples", result.len());

        Ok(run)
    }

    pub fn sample_count(&self, run: i64) -> Result<usize, StoreError> {
        let count: i64 = self.connection.query_row(
            "select count(*) from samples where run = ?",
            params![run],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    pub fn close(mut self) -> Result<(), StoreError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close results store: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(StoreError::SQLite(error));
            }
        }

        info!("Closed results store");

        Ok(())
    }
}

pub const SQL_SCHEMA: [&str; 2] = [
    "create table if not exists runs (
    id integer primary key,
    num_databases integer not null,
    ddl_mode text not null,
    iterations integer not null,
    failed_iterations integer not null,
    started_at text not null
);",
    "create table if not exists samples (
    id integer primary key,
    run integer not null references runs (id),
    iteration integer not null,
    database text not null,
    is_fixed_ddl integer not null,
    \"table\" text not null,
    duration_ms real not null,
    timestamp text not null,
    query_num integer not null
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
