use clap::{ArgAction, Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tenbench::{
    benchmark::RunConfig,
    config::{BenchConfig, ConfigErrors},
    logging,
    provision::Provisioner,
    sweep::Experiment,
    warehouse::Warehouses,
};
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "tenbench.yaml";

/// Query latency benchmark over many small databases
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// YAML configuration, built-in defaults are used if the default file is absent
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, env = "TENBENCH_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, env = "TENBENCH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, env = "TENBENCH_ACCOUNT_NAME", hide_env_values = true)]
    account_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the test databases and their tables
    Provision {
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        count: Option<usize>,
    },
    /// Run a single benchmark and report it
    Run {
        /// size of the database pool reads are sampled from
        #[arg(long)]
        databases: usize,
        #[arg(long)]
        queries: Option<usize>,
        /// run the DDL in this database instead of the configured one
        #[arg(long, conflicts_with = "local")]
        fixed_ddl_database: Option<String>,
        /// run the DDL in the database that is queried
        #[arg(long)]
        local: bool,
    },
    /// Run every configured pool size in both DDL modes
    Sweep {
        /// provision the configured databases first
        #[arg(long)]
        provision: bool,
    },
    /// Validate the configuration only
    Check,
}

fn load_config(path: &Path) -> Result<BenchConfig, ConfigErrors> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        return Ok(BenchConfig::default());
    }

    BenchConfig::load(path)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let loaded = load_config(&cli.config);

    let log_file = match &loaded {
        Ok(config) => config.log.file.clone(),
        Err(_) => None,
    };
    if let Err(e) = logging::init(cli.verbose, log_file.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(path = ?cli.config, "Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(client_id) = cli.client_id {
        config.credentials.client_id = client_id;
    }
    if let Some(client_secret) = cli.client_secret {
        config.credentials.client_secret = client_secret;
    }
    if let Some(account_name) = cli.account_name {
        config.credentials.account_name = account_name;
    }

    if config.preflight_checks() {
        error!("{}", ConfigErrors::Preflight);
        return ExitCode::FAILURE;
    }

    let warehouse = Warehouses::load(&config.warehouse);
    let credentials = config.credentials.clone();

    match cli.command {
        Command::Check => {
            info!("Configuration is valid");
        }
        Command::Provision { start, count } => {
            Provisioner::new(&warehouse, &credentials, &config.provision).provision_databases(
                start.unwrap_or(config.provision.start_index),
                count.unwrap_or(config.provision.count),
            );
        }
        Command::Run {
            databases,
            queries,
            fixed_ddl_database,
            local,
        } => {
            let mut experiment = Experiment::new(&config, &warehouse, &credentials);
            let fixed = if local {
                None
            } else {
                fixed_ddl_database.or_else(|| config.benchmark.fixed_ddl_database.clone())
            };
            let run = RunConfig::new(
                databases,
                queries.unwrap_or(config.benchmark.queries),
                fixed,
            )
            .with_iterations(config.benchmark.iterations);

            experiment.execute(&run);
            experiment.close();
        }
        Command::Sweep { provision } => {
            if provision {
                Provisioner::new(&warehouse, &credentials, &config.provision)
                    .provision_databases(config.provision.start_index, config.provision.count);
            }

            let mut experiment = Experiment::new(&config, &warehouse, &credentials);
            experiment.sweep(
                &config.benchmark.sweep,
                config.benchmark.fixed_ddl_database.as_deref(),
            );
            experiment.close();
        }
    }

    ExitCode::SUCCESS
}
