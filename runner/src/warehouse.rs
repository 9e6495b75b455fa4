pub mod memory;
pub mod sql;
pub mod sqlite;

use crate::config::{Credentials, WarehouseConfig};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::error;

pub use memory::{FaultConfig, MemoryConnection, MemoryWarehouse};
pub use sqlite::{SqliteConnection, SqliteWarehouse};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WarehouseError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Failed to reach warehouse: {0}")]
    Connectivity(String),
    #[error("Query `{sql}` failed: {message}")]
    Query { sql: String, message: String },
}

impl WarehouseError {
    pub fn query(sql: &str, message: impl Into<String>) -> Self {
        Self::Query {
            sql: sql.to_owned(),
            message: message.into(),
        }
    }
}

/// Single cell of a result row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

/// Buffered result of a statement, consumed front to back
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    rows: VecDeque<Vec<Value>>,
}

impl Rows {
    pub fn new(rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fetch_one(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Live session with the warehouse
///
/// A connection is owned by exactly one unit of work and must be closed on
/// every exit path of that unit.
pub trait Connection {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError>;

    fn close(self) -> Result<(), WarehouseError>
    where
        Self: Sized;
}

/// Source of authenticated connections, shared by all provisioning workers
pub trait Warehouse: Sync {
    type Connection: Connection;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Connection, WarehouseError>;
}

/// Open a session, logging the failure before handing it back
///
/// No retries happen here, callers decide whether a failure is worth another
/// attempt.
pub fn open_connection<W: Warehouse>(
    warehouse: &W,
    credentials: &Credentials,
) -> Result<W::Connection, WarehouseError> {
    warehouse.connect(credentials).map_err(|e| {
        error!("Failed to create warehouse connection: {e}");
        e
    })
}

/// reject credentials with empty fields before touching a backend
pub(crate) fn require_complete(credentials: &Credentials) -> Result<(), WarehouseError> {
    let missing = credentials.missing_fields();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(WarehouseError::Auth(format!(
            "missing {}",
            missing.join(", ")
        )))
    }
}

/// Selected warehouse backend
#[derive(Debug, Clone)]
pub enum Warehouses {
    Sqlite(SqliteWarehouse),
    Memory(MemoryWarehouse),
}

#[derive(Debug)]
pub enum Connections {
    Sqlite(SqliteConnection),
    Memory(MemoryConnection),
}

impl Warehouses {
    pub fn load(config: &WarehouseConfig) -> Self {
        match config {
            WarehouseConfig::Sqlite { path } => Self::Sqlite(SqliteWarehouse::new(path)),
            WarehouseConfig::Memory { latency_ms, faults } => Self::Memory(
                MemoryWarehouse::new()
                    .with_latency(std::time::Duration::from_millis(*latency_ms))
                    .with_faults(faults.clone()),
            ),
        }
    }
}

impl Warehouse for Warehouses {
    type Connection = Connections;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Connection, WarehouseError> {
        match self {
            Self::Sqlite(warehouse) => warehouse.connect(credentials).map(Connections::Sqlite),
            Self::Memory(warehouse) => warehouse.connect(credentials).map(Connections::Memory),
        }
    }
}

impl Connection for Connections {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        match self {
            Self::Sqlite(connection) => connection.execute(sql),
            Self::Memory(connection) => connection.execute(sql),
        }
    }

    fn close(self) -> Result<(), WarehouseError> {
        match self {
            Self::Sqlite(connection) => connection.close(),
            Self::Memory(connection) => connection.close(),
        }
    }
}
