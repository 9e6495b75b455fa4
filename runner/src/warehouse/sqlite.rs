use super::{
    require_complete,
    sql::{Statement, SYSTEM_ENGINE},
    Connection, Rows, Value, Warehouse, WarehouseError,
};
use crate::config::Credentials;
use rusqlite::{params, types::ValueRef, OpenFlags, OptionalExtension};
use std::{
    fs,
    path::PathBuf,
    time::Duration,
};
use tracing::{error, trace};

const CATALOG_FILE: &str = "_engines.sqlite";
const CATALOG_SCHEMA: &str = "create table if not exists engines (
    name text primary key,
    status text not null
);";
const RUNNING: &str = "running";
const STOPPED: &str = "stopped";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Warehouse stand-in on the local file system
///
/// Layout: `<root>/<account>/<database>.sqlite` per database and one engine
/// catalog per account.
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    root: PathBuf,
}

impl SqliteWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Warehouse for SqliteWarehouse {
    type Connection = SqliteConnection;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Connection, WarehouseError> {
        require_complete(credentials)?;

        if !is_identifier(&credentials.account_name) {
            return Err(WarehouseError::Auth(format!(
                "account name {:?} is not valid",
                credentials.account_name
            )));
        }

        let directory = self.root.join(&credentials.account_name);
        fs::create_dir_all(&directory).map_err(|e| {
            WarehouseError::Connectivity(format!("{}: {e}", directory.display()))
        })?;

        Ok(SqliteConnection {
            directory,
            catalog: None,
            database: None,
            engine: None,
        })
    }
}

#[derive(Debug)]
pub struct SqliteConnection {
    directory: PathBuf,
    catalog: Option<rusqlite::Connection>,
    database: Option<(String, rusqlite::Connection)>,
    engine: Option<String>,
}

/// names end up in file paths, keep them to plain identifiers
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn failed(sql: &str) -> impl FnOnce(rusqlite::Error) -> WarehouseError + '_ {
    move |error| WarehouseError::query(sql, error.to_string())
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl SqliteConnection {
    fn database_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.sqlite"))
    }

    /// engine catalog, opened on first use
    fn catalog(&mut self, sql: &str) -> Result<&rusqlite::Connection, WarehouseError> {
        if self.catalog.is_none() {
            let catalog =
                rusqlite::Connection::open(self.directory.join(CATALOG_FILE)).map_err(failed(sql))?;
            catalog.busy_timeout(BUSY_TIMEOUT).map_err(failed(sql))?;
            catalog.execute(CATALOG_SCHEMA, []).map_err(failed(sql))?;

            self.catalog = Some(catalog);
        }

        self.catalog
            .as_ref()
            .ok_or_else(|| WarehouseError::query(sql, "engine catalog unavailable"))
    }

    fn engine_status(&mut self, name: &str, sql: &str) -> Result<Option<String>, WarehouseError> {
        self.catalog(sql)?
            .query_row(
                "select status from engines where name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(failed(sql))
    }

    fn database(&self, sql: &str) -> Result<&rusqlite::Connection, WarehouseError> {
        self.database
            .as_ref()
            .map(|(_, connection)| connection)
            .ok_or_else(|| WarehouseError::query(sql, "no database selected"))
    }

    fn checked_name<'a>(name: &'a str, sql: &str) -> Result<&'a str, WarehouseError> {
        if is_identifier(name) {
            Ok(name)
        } else {
            Err(WarehouseError::query(sql, format!("invalid identifier {name:?}")))
        }
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        trace!(sql = sql, "Executing statement");

        let statement =
            Statement::parse(sql).ok_or_else(|| WarehouseError::query(sql, "syntax error"))?;

        match statement {
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => {
                let path = self.database_path(Self::checked_name(name, sql)?);

                if path.exists() {
                    if !if_not_exists {
                        return Err(WarehouseError::query(sql, "database already exists"));
                    }
                } else {
                    // opening with default flags creates the file
                    rusqlite::Connection::open(&path)
                        .map_err(failed(sql))?
                        .close()
                        .map_err(|(_, error)| failed(sql)(error))?;
                }
            }
            Statement::UseDatabase(name) => {
                let path = self.database_path(Self::checked_name(name, sql)?);
                let connection = rusqlite::Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|_| WarehouseError::query(sql, format!("database {name} does not exist")))?;

                self.database = Some((name.to_owned(), connection));
            }
            Statement::CreateEngine {
                name,
                if_not_exists,
            } => {
                let inserted = self
                    .catalog(sql)?
                    .execute(
                        "insert or ignore into engines (name, status) values (?, ?)",
                        params![name, RUNNING],
                    )
                    .map_err(failed(sql))?;

                if inserted == 0 && !if_not_exists {
                    return Err(WarehouseError::query(sql, "engine already exists"));
                }
            }
            Statement::UseEngine(name) => {
                if name != SYSTEM_ENGINE {
                    // selecting a stopped engine starts it again
                    let updated = self
                        .catalog(sql)?
                        .execute(
                            "update engines set status = ? where name = ?",
                            params![RUNNING, name],
                        )
                        .map_err(failed(sql))?;

                    if updated == 0 {
                        return Err(WarehouseError::query(
                            sql,
                            format!("engine {name} does not exist"),
                        ));
                    }
                }

                self.engine = Some(name.to_owned());
            }
            Statement::StopEngine(name) => {
                let updated = self
                    .catalog(sql)?
                    .execute(
                        "update engines set status = ? where name = ?",
                        params![STOPPED, name],
                    )
                    .map_err(failed(sql))?;

                if updated == 0 {
                    return Err(WarehouseError::query(
                        sql,
                        format!("engine {name} does not exist"),
                    ));
                }
            }
            Statement::DropEngine(name) => match self.engine_status(name, sql)?.as_deref() {
                Some(STOPPED) => {
                    self.catalog(sql)?
                        .execute("delete from engines where name = ?", params![name])
                        .map_err(failed(sql))?;
                }
                Some(_) => return Err(WarehouseError::query(sql, "engine must be stopped first")),
                None => {
                    return Err(WarehouseError::query(
                        sql,
                        format!("engine {name} does not exist"),
                    ))
                }
            },
            Statement::CountTables => {
                let count: i64 = self
                    .database(sql)?
                    .query_row(
                        "select count(*) from sqlite_master where type = 'table'",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(failed(sql))?;

                return Ok(Rows::new([vec![Value::Integer(count)]]));
            }
            Statement::CreateTable { .. } | Statement::DropTable { .. } => {
                self.database(sql)?
                    .execute_batch(sql)
                    .map_err(failed(sql))?;
            }
            Statement::Select { .. } => {
                let engine = self
                    .engine
                    .clone()
                    .filter(|engine| engine != SYSTEM_ENGINE)
                    .ok_or_else(|| {
                        WarehouseError::query(sql, "user tables can only be read on a user engine")
                    })?;

                if self.engine_status(&engine, sql)?.as_deref() != Some(RUNNING) {
                    return Err(WarehouseError::query(
                        sql,
                        format!("engine {engine} is not running"),
                    ));
                }

                let mut prepared = self.database(sql)?.prepare(sql).map_err(failed(sql))?;
                let columns = prepared.column_count();
                let rows = prepared
                    .query_map([], |row| {
                        (0..columns)
                            .map(|index| row.get_ref(index).map(Value::from))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .map_err(failed(sql))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(failed(sql))?;

                return Ok(Rows::new(rows));
            }
        }

        Ok(Rows::empty())
    }

    fn close(self) -> Result<(), WarehouseError> {
        let connections = self
            .catalog
            .into_iter()
            .chain(self.database.map(|(_, connection)| connection));

        for connection in connections {
            close_with_retry(connection)?;
        }

        Ok(())
    }
}

fn close_with_retry(mut connection: rusqlite::Connection) -> Result<(), WarehouseError> {
    let mut counter = 0;

    while let Err((returned, error)) = connection.close() {
        counter += 1;
        connection = returned;
        error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

        if counter == 3 {
            return Err(WarehouseError::Connectivity(error.to_string()));
        }
    }

    Ok(())
}
