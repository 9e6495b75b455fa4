use super::{
    require_complete,
    sql::{Statement, SYSTEM_ENGINE},
    Connection, Rows, Value, Warehouse, WarehouseError,
};
use crate::config::Credentials;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::trace;

/// Failures injected into the simulated warehouse
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    /// statements fail while one of these databases is in use or targeted
    #[serde(default)]
    pub databases: BTreeSet<String>,
    /// fail every `nth` statement containing `pattern`
    #[serde(default)]
    pub every: Option<FaultEvery>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FaultEvery {
    pub pattern: String,
    pub nth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineStatus {
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct Catalog {
    databases: BTreeMap<String, BTreeSet<String>>,
    engines: BTreeMap<String, EngineStatus>,
    matched: usize,
    statements: Vec<String>,
}

/// In-process warehouse shared by every connection made from it
///
/// Cloning shares the catalog, so tests can keep a handle for inspection
/// while the harness works on another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    catalog: Arc<Mutex<Catalog>>,
    latency: Duration,
    faults: Arc<FaultConfig>,
    credentials: Option<Credentials>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// delay applied to every SELECT
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = Arc::new(faults);
        self
    }

    /// only accept exactly these credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn databases(&self) -> Vec<String> {
        self.catalog.lock().databases.keys().cloned().collect()
    }

    pub fn tables(&self, database: &str) -> Option<BTreeSet<String>> {
        self.catalog.lock().databases.get(database).cloned()
    }

    pub fn engines(&self) -> Vec<String> {
        self.catalog.lock().engines.keys().cloned().collect()
    }

    /// every statement received so far, in arrival order
    pub fn statements(&self) -> Vec<String> {
        self.catalog.lock().statements.clone()
    }

    pub fn opened_connections(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Warehouse for MemoryWarehouse {
    type Connection = MemoryConnection;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Connection, WarehouseError> {
        require_complete(credentials)?;

        if let Some(expected) = &self.credentials {
            if expected != credentials {
                return Err(WarehouseError::Auth("invalid client credentials".to_owned()));
            }
        }

        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryConnection {
            warehouse: self.clone(),
            database: None,
            engine: None,
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    warehouse: MemoryWarehouse,
    database: Option<String>,
    engine: Option<String>,
}

impl MemoryConnection {
    fn inject_faults(
        &self,
        catalog: &mut Catalog,
        sql: &str,
        statement: &Statement,
    ) -> Result<(), WarehouseError> {
        let faults = &self.warehouse.faults;

        let target = match statement {
            Statement::CreateDatabase { name, .. } | Statement::UseDatabase(name) => Some(*name),
            _ => self.database.as_deref(),
        };
        if let Some(database) = target.filter(|database| faults.databases.contains(*database)) {
            return Err(WarehouseError::query(
                sql,
                format!("simulated failure in {database}"),
            ));
        }

        if let Some(every) = faults.every.as_ref().filter(|every| every.nth > 0) {
            if sql.contains(&every.pattern) {
                catalog.matched += 1;

                if catalog.matched % every.nth == 0 {
                    return Err(WarehouseError::query(sql, "simulated intermittent failure"));
                }
            }
        }

        Ok(())
    }

    fn current_database<'a>(
        &self,
        catalog: &'a mut Catalog,
        sql: &str,
    ) -> Result<&'a mut BTreeSet<String>, WarehouseError> {
        let name = self
            .database
            .as_deref()
            .ok_or_else(|| WarehouseError::query(sql, "no database selected"))?;

        catalog
            .databases
            .get_mut(name)
            .ok_or_else(|| WarehouseError::query(sql, format!("database {name} does not exist")))
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        trace!(sql = sql, "Executing statement");

        let statement =
            Statement::parse(sql).ok_or_else(|| WarehouseError::query(sql, "syntax error"))?;

        let catalog = Arc::clone(&self.warehouse.catalog);
        let mut catalog = catalog.lock();
        catalog.statements.push(sql.to_owned());
        self.inject_faults(&mut catalog, sql, &statement)?;

        match statement {
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => {
                if catalog.databases.contains_key(name) {
                    if !if_not_exists {
                        return Err(WarehouseError::query(sql, "database already exists"));
                    }
                } else {
                    catalog.databases.insert(name.to_owned(), BTreeSet::new());
                }
            }
            Statement::UseDatabase(name) => {
                if !catalog.databases.contains_key(name) {
                    return Err(WarehouseError::query(
                        sql,
                        format!("database {name} does not exist"),
                    ));
                }

                self.database = Some(name.to_owned());
            }
            Statement::CreateEngine {
                name,
                if_not_exists,
            } => {
                if catalog.engines.contains_key(name) {
                    if !if_not_exists {
                        return Err(WarehouseError::query(sql, "engine already exists"));
                    }
                } else {
                    catalog.engines.insert(name.to_owned(), EngineStatus::Running);
                }
            }
            Statement::UseEngine(name) => {
                if name != SYSTEM_ENGINE {
                    // selecting a stopped engine starts it again
                    match catalog.engines.get_mut(name) {
                        Some(status) => *status = EngineStatus::Running,
                        None => {
                            return Err(WarehouseError::query(
                                sql,
                                format!("engine {name} does not exist"),
                            ))
                        }
                    }
                }

                self.engine = Some(name.to_owned());
            }
            Statement::StopEngine(name) => match catalog.engines.get_mut(name) {
                Some(status) => *status = EngineStatus::Stopped,
                None => {
                    return Err(WarehouseError::query(
                        sql,
                        format!("engine {name} does not exist"),
                    ))
                }
            },
            Statement::DropEngine(name) => match catalog.engines.get(name).copied() {
                Some(EngineStatus::Stopped) => {
                    catalog.engines.remove(name);
                }
                Some(EngineStatus::Running) => {
                    return Err(WarehouseError::query(sql, "engine must be stopped first"))
                }
                None => {
                    return Err(WarehouseError::query(
                        sql,
                        format!("engine {name} does not exist"),
                    ))
                }
            },
            Statement::CountTables => {
                let count = self.current_database(&mut catalog, sql)?.len();

                return Ok(Rows::new([vec![Value::Integer(count as i64)]]));
            }
            Statement::CreateTable {
                name,
                if_not_exists,
            } => {
                let tables = self.current_database(&mut catalog, sql)?;

                if !tables.insert(name.to_owned()) && !if_not_exists {
                    return Err(WarehouseError::query(sql, "table already exists"));
                }
            }
            Statement::DropTable { name, if_exists } => {
                let tables = self.current_database(&mut catalog, sql)?;

                if !tables.remove(name) && !if_exists {
                    return Err(WarehouseError::query(
                        sql,
                        format!("table {name} does not exist"),
                    ));
                }
            }
            Statement::Select { table } => {
                match self.engine.as_deref() {
                    Some(engine) if engine != SYSTEM_ENGINE => {
                        if catalog.engines.get(engine) != Some(&EngineStatus::Running) {
                            return Err(WarehouseError::query(
                                sql,
                                format!("engine {engine} is not running"),
                            ));
                        }
                    }
                    _ => {
                        return Err(WarehouseError::query(
                            sql,
                            "user tables can only be read on a user engine",
                        ))
                    }
                }

                if !self.current_database(&mut catalog, sql)?.contains(table) {
                    return Err(WarehouseError::query(
                        sql,
                        format!("table {table} does not exist"),
                    ));
                }

                drop(catalog);
                if !self.warehouse.latency.is_zero() {
                    thread::sleep(self.warehouse.latency);
                }
            }
        }

        Ok(Rows::empty())
    }

    fn close(self) -> Result<(), WarehouseError> {
        self.warehouse.closed.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::sql;

    fn credentials() -> Credentials {
        Credentials::new("id", "secret", "account")
    }

    #[test]
    pub fn rejects_incomplete_credentials() {
        let warehouse = MemoryWarehouse::new();

        assert!(matches!(
            warehouse.connect(&Credentials::new("id", "", "account")),
            Err(WarehouseError::Auth(_))
        ));
        assert_eq!(warehouse.opened_connections(), 0);
    }

    #[test]
    pub fn rejects_unexpected_credentials() {
        let warehouse = MemoryWarehouse::new().with_credentials(credentials());

        assert!(warehouse.connect(&credentials()).is_ok());
        assert!(matches!(
            warehouse.connect(&Credentials::new("id", "other", "account")),
            Err(WarehouseError::Auth(_))
        ));
    }

    #[test]
    pub fn select_requires_running_user_engine() {
        let warehouse = MemoryWarehouse::new();
        let mut connection = warehouse.connect(&credentials()).unwrap();

        connection.execute(&sql::create_database("db")).unwrap();
        connection.execute(&sql::use_database("db")).unwrap();
        connection.execute(&sql::create_table("table_0")).unwrap();
        assert!(connection.execute(&sql::select_all("table_0")).is_err());

        connection.execute(&sql::create_engine("engine")).unwrap();
        connection.execute(&sql::use_engine("engine")).unwrap();
        assert!(connection.execute(&sql::select_all("table_0")).is_ok());
        assert!(connection.execute(&sql::select_all("table_1")).is_err());

        connection.execute(&sql::use_engine(SYSTEM_ENGINE)).unwrap();
        assert!(connection.execute(&sql::drop_engine("engine")).is_err());
        connection.execute(&sql::stop_engine("engine")).unwrap();
        connection.execute(&sql::drop_engine("engine")).unwrap();
        assert!(warehouse.engines().is_empty());

        connection.close().unwrap();
        assert_eq!(warehouse.closed_connections(), 1);
    }

    #[test]
    pub fn using_stopped_engine_starts_it() {
        let warehouse = MemoryWarehouse::new();
        let mut connection = warehouse.connect(&credentials()).unwrap();

        connection.execute(&sql::create_database("db")).unwrap();
        connection.execute(&sql::use_database("db")).unwrap();
        connection.execute(&sql::create_table("table_0")).unwrap();
        connection.execute(&sql::create_engine("engine")).unwrap();
        connection.execute(&sql::use_engine(SYSTEM_ENGINE)).unwrap();
        connection.execute(&sql::stop_engine("engine")).unwrap();

        connection.execute(&sql::create_engine("engine")).unwrap();
        connection.execute(&sql::use_engine("engine")).unwrap();
        assert!(connection.execute(&sql::select_all("table_0")).is_ok());
    }

    #[test]
    pub fn counts_tables_of_current_database() {
        let warehouse = MemoryWarehouse::new();
        let mut connection = warehouse.connect(&credentials()).unwrap();

        assert!(connection.execute(sql::TABLE_COUNT_QUERY).is_err());
        connection.execute(&sql::create_database("db")).unwrap();
        connection.execute(&sql::use_database("db")).unwrap();
        for table in 0..3 {
            connection
                .execute(&sql::create_table(&sql::table_name(table)))
                .unwrap();
        }

        let mut rows = connection.execute(sql::TABLE_COUNT_QUERY).unwrap();
        assert_eq!(rows.fetch_one(), Some(vec![Value::Integer(3)]));
        assert_eq!(rows.fetch_one(), None);
    }

    #[test]
    pub fn injects_intermittent_failures() {
        let warehouse = MemoryWarehouse::new().with_faults(FaultConfig {
            databases: BTreeSet::from(["broken".to_owned()]),
            every: Some(FaultEvery {
                pattern: "CREATE TABLE".to_owned(),
                nth: 2,
            }),
        });
        let mut connection = warehouse.connect(&credentials()).unwrap();

        assert!(connection.execute(&sql::create_database("broken")).is_err());
        connection.execute(&sql::create_database("db")).unwrap();
        connection.execute(&sql::use_database("db")).unwrap();

        let outcomes = (0..4)
            .map(|table| {
                connection
                    .execute(&sql::create_table(&sql::table_name(table)))
                    .is_ok()
            })
            .collect::<Vec<_>>();

        assert_eq!(outcomes, vec![true, false, true, false]);
        assert_eq!(warehouse.tables("db").map(|tables| tables.len()), Some(2));
    }
}
