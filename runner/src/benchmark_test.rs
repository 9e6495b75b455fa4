use crate::{
    benchmark::{BenchmarkRunner, RunConfig, RunPhase},
    config::{Credentials, ProvisionConfig},
    provision::Provisioner,
    warehouse::{
        memory::{FaultConfig, FaultEvery},
        sql, MemoryWarehouse,
    },
};
use itertools::Itertools;
use std::collections::BTreeSet;
use tenbench_analysis::{DdlMode, RunResult};

const ENGINE: &str = "benchmark_engine";

fn credentials() -> Credentials {
    Credentials::new("id", "secret", "account")
}

/// warehouse with `test_database_<n>` for every given index, 100 tables each
fn provisioned(indices: impl IntoIterator<Item = usize>, faults: FaultConfig) -> MemoryWarehouse {
    let setup = MemoryWarehouse::new();
    let credentials = credentials();
    let provisioner = Provisioner::new(&setup, &credentials, &ProvisionConfig::default());

    for index in indices {
        assert!(provisioner.provision_database(index).0);
    }

    // faults only apply to the benchmark, the catalog is shared with `setup`
    setup.with_faults(faults)
}

fn run(warehouse: &MemoryWarehouse, config: &RunConfig, seed: u64) -> (RunResult, RunPhase) {
    let credentials = credentials();
    let mut runner = BenchmarkRunner::new(warehouse, &credentials, ENGINE, 100, Some(seed));
    let result = runner.run_benchmark(config);

    (result, runner.phase())
}

fn assert_iteration_blocks(result: &RunResult, queries: usize) {
    for (_, block) in &result.iter().group_by(|sample| sample.iteration) {
        let query_nums = block.map(|sample| sample.query_num).collect_vec();
        assert_eq!(query_nums, (0..queries).collect_vec());
    }
}

#[test]
pub fn single_database_local_ddl() {
    let warehouse = provisioned([1], FaultConfig::default());

    let (result, phase) = run(&warehouse, &RunConfig::new(1, 2, None), 1);

    assert_eq!(phase, RunPhase::Done);
    assert_eq!(result.len(), 200);
    assert_eq!(result.failed_iterations, 0);
    assert_eq!(result.ddl_mode, DdlMode::Local);
    assert!(result.iter().all(|sample| sample.database == "test_database_1"));
    assert!(result.iter().all(|sample| !sample.is_fixed_ddl));
    assert!(result.iter().all(|sample| {
        sample
            .table
            .strip_prefix("table_")
            .and_then(|index| index.parse::<usize>().ok())
            .is_some_and(|index| index < 100)
    }));
    assert!(result.iter().all(|sample| sample.duration_ms >= 0.0));
    assert_iteration_blocks(&result, 2);

    // the run cleans up after itself
    assert!(warehouse.engines().is_empty());
    assert!(!warehouse
        .tables("test_database_1")
        .unwrap()
        .contains(sql::DDL_MARKER_TABLE));
    assert_eq!(warehouse.opened_connections(), warehouse.closed_connections());
}

#[test]
pub fn fixed_ddl_never_reads_marker_table() {
    let warehouse = provisioned((1..=5).chain([1000]), FaultConfig::default());
    let config = RunConfig::new(5, 1, Some("test_database_1000".to_owned()));

    let (result, _) = run(&warehouse, &config, 2);

    assert_eq!(result.len(), 100);
    assert_eq!(result.ddl_mode, DdlMode::Fixed);
    assert!(result.iter().all(|sample| sample.is_fixed_ddl));
    assert!(result
        .iter()
        .all(|sample| sample.database != "test_database_1000"));

    let statements = warehouse.statements();
    let selects = statements
        .iter()
        .filter(|statement| statement.starts_with("SELECT * FROM"))
        .collect_vec();
    assert_eq!(selects.len(), 100);
    assert!(!selects.iter().any(|statement| statement.contains(sql::DDL_MARKER_TABLE)));

    // the marker is only ever created while the fixed database is selected
    let mut current = None;
    for statement in &statements {
        if let Some(database) = statement.strip_prefix("USE DATABASE ") {
            current = Some(database.to_owned());
        }
        if statement.contains(sql::DDL_MARKER_TABLE) {
            assert_eq!(current.as_deref(), Some("test_database_1000"));
        }
    }

    for database in warehouse.databases() {
        assert!(!warehouse
            .tables(&database)
            .unwrap()
            .contains(sql::DDL_MARKER_TABLE));
    }
}

#[test]
pub fn empty_fixed_database_means_local() {
    let warehouse = provisioned([1, 2], FaultConfig::default());

    let (result, _) = run(&warehouse, &RunConfig::new(2, 1, Some(String::new())), 3);

    assert_eq!(result.ddl_mode, DdlMode::Local);
    assert_eq!(result.len(), 100);
    assert!(result.iter().all(|sample| !sample.is_fixed_ddl));
}

#[test]
pub fn failed_reads_drop_the_whole_iteration() {
    let warehouse = provisioned(
        [1, 2, 3],
        FaultConfig {
            databases: BTreeSet::new(),
            every: Some(FaultEvery {
                pattern: "SELECT * FROM".to_owned(),
                nth: 5,
            }),
        },
    );

    let (result, phase) = run(&warehouse, &RunConfig::new(3, 3, None), 4);

    assert_eq!(phase, RunPhase::Done);
    assert!(result.failed_iterations > 0);
    assert_eq!(result.completed_iterations() + result.failed_iterations, 100);
    assert_eq!(result.len(), result.completed_iterations() * 3);
    assert_iteration_blocks(&result, 3);
}

#[test]
pub fn failing_database_does_not_abort_run() {
    let warehouse = provisioned(
        [1, 2],
        FaultConfig {
            databases: BTreeSet::from(["test_database_2".to_owned()]),
            every: None,
        },
    );

    let (result, _) = run(&warehouse, &RunConfig::new(2, 2, None), 5);

    assert!(result.failed_iterations > 0);
    assert!(!result.is_empty());
    assert!(result.iter().all(|sample| sample.database == "test_database_1"));
    assert!(warehouse.engines().is_empty());
}

#[test]
pub fn missing_fixed_database_fails_every_iteration() {
    let warehouse = provisioned([1], FaultConfig::default());
    let config = RunConfig::new(1, 2, Some("test_database_1000".to_owned()));

    let (result, phase) = run(&warehouse, &config, 6);

    assert_eq!(phase, RunPhase::Done);
    assert!(result.is_empty());
    assert_eq!(result.failed_iterations, 100);
    assert!(warehouse.engines().is_empty());
}

#[test]
pub fn setup_failure_returns_nothing() {
    let warehouse = provisioned(
        [1],
        FaultConfig {
            databases: BTreeSet::new(),
            every: Some(FaultEvery {
                pattern: "USE ENGINE".to_owned(),
                nth: 1,
            }),
        },
    );

    let (result, phase) = run(&warehouse, &RunConfig::new(1, 2, None), 7);

    assert_eq!(phase, RunPhase::Done);
    assert!(result.is_empty());
    assert_eq!(result.failed_iterations, 0);
    assert_eq!(warehouse.opened_connections(), warehouse.closed_connections());
}

#[test]
pub fn teardown_failure_discards_samples() {
    let warehouse = provisioned(
        [1],
        FaultConfig {
            databases: BTreeSet::new(),
            every: Some(FaultEvery {
                pattern: "DROP ENGINE".to_owned(),
                nth: 1,
            }),
        },
    );

    let (result, _) = run(&warehouse, &RunConfig::new(1, 2, None), 8);

    assert!(result.is_empty());
    assert_eq!(result.failed_iterations, 0);
    let selects = warehouse
        .statements()
        .iter()
        .filter(|statement| statement.starts_with("SELECT * FROM"))
        .count();
    assert_eq!(selects, 200);
    assert_eq!(warehouse.opened_connections(), warehouse.closed_connections());
}

#[test]
pub fn failed_teardown_does_not_break_next_run() {
    let warehouse = provisioned(
        [1],
        FaultConfig {
            databases: BTreeSet::new(),
            every: Some(FaultEvery {
                pattern: "DROP ENGINE".to_owned(),
                nth: 1,
            }),
        },
    );

    let (first, _) = run(&warehouse, &RunConfig::new(1, 2, None), 8);
    assert!(first.is_empty());
    assert_eq!(warehouse.engines(), vec![ENGINE.to_owned()]);

    // engine was left stopped, the next run has to start it again
    let healthy = warehouse.clone().with_faults(FaultConfig::default());
    let (second, phase) = run(&healthy, &RunConfig::new(1, 2, None), 8);

    assert_eq!(phase, RunPhase::Done);
    assert_eq!(second.failed_iterations, 0);
    assert_eq!(second.len(), 200);
    assert!(warehouse.engines().is_empty());
}

fn failing_cleanup(nth: usize) -> FaultConfig {
    FaultConfig {
        databases: BTreeSet::new(),
        every: Some(FaultEvery {
            pattern: "DROP TABLE".to_owned(),
            nth,
        }),
    }
}

#[test]
pub fn failed_cleanup_drops_local_iteration() {
    let warehouse = provisioned([1, 2], failing_cleanup(4));

    let (result, phase) = run(&warehouse, &RunConfig::new(2, 3, None), 11);

    assert_eq!(phase, RunPhase::Done);
    // every 4th iteration fails on its single marker drop
    assert_eq!(result.failed_iterations, 25);
    assert_eq!(result.completed_iterations(), 75);
    assert_eq!(result.len(), result.completed_iterations() * 3);
    assert!(result.iter().all(|sample| sample.iteration % 4 != 3));
    assert_iteration_blocks(&result, 3);
}

#[test]
pub fn failed_cleanup_drops_fixed_iteration() {
    let warehouse = provisioned([1, 2, 3], failing_cleanup(4));
    let config = RunConfig::new(2, 3, Some("test_database_3".to_owned()));

    let (result, phase) = run(&warehouse, &config, 12);

    assert_eq!(phase, RunPhase::Done);
    assert_eq!(result.failed_iterations, 25);
    assert_eq!(result.len(), result.completed_iterations() * 3);
    assert!(result.iter().all(|sample| sample.iteration % 4 != 3));
    assert!(result.iter().all(|sample| sample.is_fixed_ddl));
    assert_iteration_blocks(&result, 3);

    // the marker only ever lives in the fixed database
    for database in ["test_database_1", "test_database_2"] {
        assert!(!warehouse.tables(database).unwrap().contains(sql::DDL_MARKER_TABLE));
    }
}

#[test]
pub fn failed_fixed_read_drops_the_whole_iteration() {
    let warehouse = provisioned(
        [1, 2, 3],
        FaultConfig {
            databases: BTreeSet::new(),
            every: Some(FaultEvery {
                pattern: "SELECT * FROM".to_owned(),
                nth: 5,
            }),
        },
    );
    let config = RunConfig::new(2, 3, Some("test_database_3".to_owned()));

    let (result, phase) = run(&warehouse, &config, 13);

    assert_eq!(phase, RunPhase::Done);
    assert!(result.failed_iterations > 0);
    assert_eq!(result.completed_iterations() + result.failed_iterations, 100);
    assert_eq!(result.len(), result.completed_iterations() * 3);
    assert_iteration_blocks(&result, 3);
}

#[test]
pub fn refused_connection_returns_nothing() {
    let warehouse = MemoryWarehouse::new();
    let credentials = Credentials::default();
    let mut runner = BenchmarkRunner::new(&warehouse, &credentials, ENGINE, 100, Some(9));

    let result = runner.run_benchmark(&RunConfig::new(1, 2, None));

    assert!(result.is_empty());
    assert_eq!(runner.phase(), RunPhase::Done);
    assert!(warehouse.statements().is_empty());
}

#[test]
pub fn empty_pool_is_refused() {
    let warehouse = provisioned([1], FaultConfig::default());
    let opened = warehouse.opened_connections();

    let (result, phase) = run(&warehouse, &RunConfig::new(0, 2, None), 10);

    assert!(result.is_empty());
    assert_eq!(phase, RunPhase::Done);
    assert_eq!(warehouse.opened_connections(), opened);
}

#[test]
pub fn seeded_runs_pick_same_targets() {
    let targets = |seed| {
        let warehouse = provisioned(1..=10, FaultConfig::default());
        let (result, _) = run(&warehouse, &RunConfig::new(10, 1, None).with_iterations(20), seed);

        result
            .iter()
            .map(|sample| (sample.database.clone(), sample.table.clone()))
            .collect_vec()
    };

    assert_eq!(targets(11), targets(11));
    assert_eq!(targets(11).len(), 20);
}
