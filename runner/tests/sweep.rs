use std::path::Path;
use tenbench::{
    analysis::DdlMode,
    config::{BenchConfig, ResultsConfig, WarehouseConfig},
    provision::{ProvisionSummary, Provisioner},
    store::ResultStore,
    sweep::Experiment,
    warehouse::Warehouses,
};

fn config(root: &Path) -> BenchConfig {
    let mut config = BenchConfig::parse(
        "
credentials:
  client_id: id
  client_secret: secret
  account_name: bench
provision:
  count: 3
  tables: 5
  workers: 2
benchmark:
  queries: 2
  iterations: 6
  fixed_ddl_database: test_database_3
  sweep: [1, 3]
  seed: 7
log:
  file: null
",
    )
    .unwrap();

    config.warehouse = WarehouseConfig::Sqlite {
        path: root.join("warehouse"),
    };
    config.report.output_dir = root.join("charts");
    config.results = Some(ResultsConfig {
        path: root.join("results.db"),
    });

    config
}

#[test]
pub fn sweep_over_sqlite_warehouse() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    assert!(!config.preflight_checks());

    let warehouse = Warehouses::load(&config.warehouse);
    let credentials = config.credentials.clone();

    let summary = Provisioner::new(&warehouse, &credentials, &config.provision)
        .provision_databases(1, 3)
        .unwrap();
    assert_eq!(
        summary,
        ProvisionSummary {
            successful: 3,
            failed: 0
        }
    );
    assert!(dir
        .path()
        .join("warehouse/bench/test_database_2.sqlite")
        .is_file());

    let mut experiment = Experiment::new(&config, &warehouse, &credentials);
    let outcomes = experiment.sweep(&[1, 3], Some("test_database_3"));
    experiment.close();

    let modes = outcomes
        .iter()
        .map(|outcome| (outcome.num_databases, outcome.mode))
        .collect::<Vec<_>>();
    assert_eq!(
        modes,
        vec![
            (1, DdlMode::Fixed),
            (1, DdlMode::Local),
            (3, DdlMode::Fixed),
            (3, DdlMode::Local)
        ]
    );

    for outcome in &outcomes {
        assert_eq!(outcome.samples, 12);
        assert_eq!(outcome.failed_iterations, 0);

        let chart = outcome.chart.as_ref().unwrap();
        assert!(chart.is_file());
        assert_eq!(
            chart.file_name().and_then(|name| name.to_str()),
            Some(
                format!(
                    "latency_distribution_{}_dbs_{}.pdf",
                    outcome.num_databases,
                    outcome.mode.as_str()
                )
                .as_str()
            )
        );
    }

    let store = ResultStore::load(config.results.as_ref().unwrap()).unwrap();
    for run in 1..=4 {
        assert_eq!(store.sample_count(run).unwrap(), 12);
    }
}

#[test]
pub fn unprovisioned_warehouse_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let warehouse = Warehouses::load(&config.warehouse);
    let credentials = config.credentials.clone();

    let mut experiment = Experiment::new(&config, &warehouse, &credentials);
    let run = experiment.run_config(3, None);
    let outcome = experiment.execute(&run);
    experiment.close();

    assert_eq!(outcome.samples, 0);
    assert_eq!(outcome.failed_iterations, 6);
    assert_eq!(outcome.chart, None);
    assert!(!dir
        .path()
        .join("charts/latency_distribution_3_dbs_local_ddl.pdf")
        .exists());
}
