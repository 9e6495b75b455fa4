use crate::{
    config::{Credentials, ProvisionConfig},
    warehouse::{open_connection, sql, Connection, Value, Warehouse, WarehouseError},
};
use rayon::{prelude::*, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, instrument, warn};

/// Final tally of a provisioning batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub successful: u64,
    pub failed: u64,
}

impl ProvisionSummary {
    pub fn total(&self) -> u64 {
        self.successful + self.failed
    }
}

/// Creates the `test_database_<n>` fixtures, each holding `tables` tables
pub struct Provisioner<'a, W: Warehouse> {
    warehouse: &'a W,
    credentials: &'a Credentials,
    workers: usize,
    tables: usize,
}

impl<'a, W: Warehouse> Provisioner<'a, W> {
    pub fn new(warehouse: &'a W, credentials: &'a Credentials, config: &ProvisionConfig) -> Self {
        Self {
            warehouse,
            credentials,
            workers: config.workers,
            tables: config.tables,
        }
    }

    /// Make sure database `index` exists with its full set of tables
    ///
    /// Idempotent: a database already holding the expected number of tables
    /// is left untouched. Failures are logged and reported as `false`, they
    /// never reach sibling tasks.
    #[instrument(skip(self), level = "debug")]
    pub fn provision_database(&self, index: usize) -> (bool, String) {
        let name = sql::database_name(index);

        let mut connection = match open_connection(self.warehouse, self.credentials) {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to create database {name}: {e}");
                return (false, name);
            }
        };

        let result = self.populate(&mut connection, &name);

        if let Err(e) = connection.close() {
            warn!("Failed to close connection for {name}: {e}");
        }

        match result {
            Ok(()) => (true, name),
            Err(e) => {
                error!("Failed to create database {name}: {e}");
                (false, name)
            }
        }
    }

    fn populate(&self, connection: &mut W::Connection, name: &str) -> Result<(), WarehouseError> {
        info!("Creating database: {name}");
        connection.execute(&sql::create_database(name))?;
        connection.execute(&sql::use_database(name))?;

        let table_count = connection
            .execute(sql::TABLE_COUNT_QUERY)?
            .fetch_one()
            .and_then(|row| row.first().and_then(Value::as_i64))
            .ok_or_else(|| WarehouseError::query(sql::TABLE_COUNT_QUERY, "returned no count"))?;

        if table_count == self.tables as i64 {
            info!(
                "Database {name} already has {} tables, skipping table creation",
                self.tables
            );
            return Ok(());
        }

        info!("Creating {} tables in database: {name}", self.tables);
        for table in 0..self.tables {
            connection.execute(&sql::create_table(&sql::table_name(table)))?;
        }

        info!("Successfully created database: {name}");

        Ok(())
    }

    /// Provision `count` databases starting at `start_index` on a bounded pool
    ///
    /// Returns `None` without doing any work if the credentials are
    /// incomplete or the index range does not fit in `usize`. Partial failures are not rolled back, a rerun picks up the
    /// databases that failed.
    #[instrument(skip(self), level = "info")]
    pub fn provision_databases(&self, start_index: usize, count: usize) -> Option<ProvisionSummary> {
        if !self.credentials.is_complete() {
            error!("Client ID, Client Secret, and Account Name must be provided");
            return None;
        }

        let Some(end_index) = start_index.checked_add(count) else {
            error!("Database indices {start_index}+{count} exceed the largest supported index");
            return None;
        };

        let pool = match ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|index| format!("provision-{index}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to start provisioning pool: {e}");
                return None;
            }
        };

        let successful = AtomicU64::new(0);
        let failed = AtomicU64::new(0);

        info!("Submitting {count} database creation tasks");

        pool.install(|| {
            (start_index..end_index)
                .into_par_iter()
                .for_each(|index| {
                    let (success, name) = self.provision_database(index);

                    let (successful_creates, failed_creates) = if success {
                        (
                            successful.fetch_add(1, Ordering::SeqCst) + 1,
                            failed.load(Ordering::SeqCst),
                        )
                    } else {
                        (
                            successful.load(Ordering::SeqCst),
                            failed.fetch_add(1, Ordering::SeqCst) + 1,
                        )
                    };

                    info!(
                        database = %name,
                        "Running totals - Successful: {successful_creates}, Failed: {failed_creates}"
                    );
                })
        });

        let summary = ProvisionSummary {
            successful: successful.into_inner(),
            failed: failed.into_inner(),
        };

        info!(
            "All creation complete. Final totals - Successful: {}, Failed: {}",
            summary.successful, summary.failed
        );

        Some(summary)
    }
}
