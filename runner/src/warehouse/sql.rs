//! Statement text used by the harness and a classifier for it
//!
//! Every identifier interpolated here is generated by the harness itself
//! (`test_database_<n>`, `table_<n>`, configured engine names). Switch to
//! parameterized statements before feeding anything user supplied through.

use itertools::Itertools;

pub const DDL_MARKER_TABLE: &str = "ddl_test";
pub const SYSTEM_ENGINE: &str = "system";
pub const TABLE_COUNT_QUERY: &str =
    "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'";

pub fn database_name(index: usize) -> String {
    format!("test_database_{index}")
}

/// inverse of [`database_name`]
pub fn database_index(name: &str) -> Option<usize> {
    name.strip_prefix("test_database_")?.parse().ok()
}

pub fn table_name(index: usize) -> String {
    format!("table_{index}")
}

pub fn create_database(name: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {name}")
}

pub fn use_database(name: &str) -> String {
    format!("USE DATABASE {name}")
}

pub fn create_engine(name: &str) -> String {
    format!("CREATE ENGINE IF NOT EXISTS {name}")
}

pub fn use_engine(name: &str) -> String {
    format!("USE ENGINE {name}")
}

pub fn stop_engine(name: &str) -> String {
    format!("STOP ENGINE {name}")
}

pub fn drop_engine(name: &str) -> String {
    format!("DROP ENGINE {name}")
}

pub fn create_table(name: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {name} (id INT, name STRING)")
}

pub fn drop_table(name: &str) -> String {
    format!("DROP TABLE {name}")
}

pub fn select_all(table: &str) -> String {
    format!("SELECT * FROM {table}")
}

/// Statements understood by the local warehouse backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    CreateDatabase { name: &'a str, if_not_exists: bool },
    UseDatabase(&'a str),
    CreateEngine { name: &'a str, if_not_exists: bool },
    UseEngine(&'a str),
    StopEngine(&'a str),
    DropEngine(&'a str),
    CountTables,
    CreateTable { name: &'a str, if_not_exists: bool },
    DropTable { name: &'a str, if_exists: bool },
    Select { table: &'a str },
}

impl<'a> Statement<'a> {
    pub fn parse(sql: &'a str) -> Option<Self> {
        let tokens = sql.split_whitespace().collect_vec();
        let head = tokens
            .iter()
            .take(2)
            .map(|token| token.to_ascii_uppercase())
            .collect_vec();

        match head.iter().map(String::as_str).collect_tuple() {
            Some(("SELECT", _)) => {
                if sql.to_ascii_lowercase().contains("information_schema.tables") {
                    return Some(Self::CountTables);
                }

                let from = tokens
                    .iter()
                    .position(|token| token.eq_ignore_ascii_case("FROM"))?;

                tokens.get(from + 1).map(|&table| Self::Select {
                    table: identifier(table),
                })
            }
            Some(("CREATE", "DATABASE")) => {
                let (name, if_not_exists) = guarded(&tokens[2..], &["IF", "NOT", "EXISTS"])?;
                Some(Self::CreateDatabase {
                    name,
                    if_not_exists,
                })
            }
            Some(("CREATE", "ENGINE")) => {
                let (name, if_not_exists) = guarded(&tokens[2..], &["IF", "NOT", "EXISTS"])?;
                Some(Self::CreateEngine {
                    name,
                    if_not_exists,
                })
            }
            Some(("CREATE", "TABLE")) => {
                let (name, if_not_exists) = guarded(&tokens[2..], &["IF", "NOT", "EXISTS"])?;
                Some(Self::CreateTable {
                    name,
                    if_not_exists,
                })
            }
            Some(("DROP", "TABLE")) => {
                let (name, if_exists) = guarded(&tokens[2..], &["IF", "EXISTS"])?;
                Some(Self::DropTable { name, if_exists })
            }
            Some(("USE", "DATABASE")) => tokens.get(2).map(|&name| Self::UseDatabase(identifier(name))),
            Some(("USE", "ENGINE")) => tokens.get(2).map(|&name| Self::UseEngine(identifier(name))),
            Some(("STOP", "ENGINE")) => tokens.get(2).map(|&name| Self::StopEngine(identifier(name))),
            Some(("DROP", "ENGINE")) => tokens.get(2).map(|&name| Self::DropEngine(identifier(name))),
            _ => None,
        }
    }
}

/// strip a column list or terminator glued to a name
fn identifier(token: &str) -> &str {
    token
        .split(|c| c == '(' || c == ';')
        .next()
        .unwrap_or(token)
}

/// read `<guard...> name` or `name`, reporting whether the guard was present
fn guarded<'a>(tokens: &[&'a str], guard: &[&str]) -> Option<(&'a str, bool)> {
    let has_guard = tokens.len() > guard.len()
        && tokens
            .iter()
            .zip(guard.iter())
            .all(|(token, word)| token.eq_ignore_ascii_case(word));

    let name = if has_guard {
        tokens.get(guard.len())
    } else {
        tokens.first()
    }
    .copied()?;

    Some((identifier(name), has_guard)).filter(|(name, _)| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn database_index_reverses_name() {
        assert_eq!(database_index(&database_name(1000)), Some(1000));
        assert_eq!(database_index("test_database_"), None);
        assert_eq!(database_index("other_database_3"), None);
    }

    #[test]
    pub fn parses_generated_statements() {
        assert_eq!(
            Statement::parse(&create_database("test_database_7")),
            Some(Statement::CreateDatabase {
                name: "test_database_7",
                if_not_exists: true
            })
        );
        assert_eq!(
            Statement::parse(&use_database("test_database_7")),
            Some(Statement::UseDatabase("test_database_7"))
        );
        assert_eq!(
            Statement::parse(&create_table("table_12")),
            Some(Statement::CreateTable {
                name: "table_12",
                if_not_exists: true
            })
        );
        assert_eq!(
            Statement::parse(&drop_table(DDL_MARKER_TABLE)),
            Some(Statement::DropTable {
                name: DDL_MARKER_TABLE,
                if_exists: false
            })
        );
        assert_eq!(
            Statement::parse(&select_all("table_99")),
            Some(Statement::Select { table: "table_99" })
        );
        assert_eq!(Statement::parse(TABLE_COUNT_QUERY), Some(Statement::CountTables));
        assert_eq!(
            Statement::parse(&create_engine("benchmark_engine")),
            Some(Statement::CreateEngine {
                name: "benchmark_engine",
                if_not_exists: true
            })
        );
        assert_eq!(
            Statement::parse(&use_engine(SYSTEM_ENGINE)),
            Some(Statement::UseEngine("system"))
        );
        assert_eq!(
            Statement::parse(&stop_engine("benchmark_engine")),
            Some(Statement::StopEngine("benchmark_engine"))
        );
        assert_eq!(
            Statement::parse(&drop_engine("benchmark_engine")),
            Some(Statement::DropEngine("benchmark_engine"))
        );
    }

    #[test]
    pub fn parses_loose_spelling() {
        assert_eq!(
            Statement::parse("create table t1(id INT);"),
            Some(Statement::CreateTable {
                name: "t1",
                if_not_exists: false
            })
        );
        assert_eq!(
            Statement::parse("drop table if exists t1;"),
            Some(Statement::DropTable {
                name: "t1",
                if_exists: true
            })
        );
        assert_eq!(Statement::parse("VACUUM"), None);
        assert_eq!(Statement::parse("USE DATABASE"), None);
        assert_eq!(Statement::parse(""), None);
    }
}
