use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use roster_reconcile::{
    audit, get_all_employees, Config, LocalObjectStore, LogAlertChannel, Orchestrator,
    RunOptions, Warehouse,
};

#[derive(Parser)]
#[command(name = "roster-reconcile", version, about = "Reconcile employee batch files into the warehouse")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every pending batch file once
    Run {
        /// Reconcile and report, then roll back. Nothing is exported or archived.
        #[arg(long)]
        dry_run: bool,
    },
    /// Create the warehouse schema
    Init,
    /// Print the audit ledger as JSON
    Ledger,
    /// Print the authoritative employee records as JSON
    Employees,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { dry_run } => run(&config, dry_run),
        Command::Init => {
            let warehouse = Warehouse::open(&config.warehouse.path)
                .context("Failed to initialise warehouse")?;
            warehouse.close()?;
            tracing::info!(path = %config.warehouse.path.display(), "warehouse ready");
            Ok(())
        }
        Command::Ledger => {
            let warehouse = Warehouse::open(&config.warehouse.path)
                .context("Failed to open warehouse")?;
            let entries = audit::entries(warehouse.connection())?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(())
        }
        Command::Employees => {
            let warehouse = Warehouse::open(&config.warehouse.path)
                .context("Failed to open warehouse")?;
            let employees = get_all_employees(warehouse.connection())?;
            println!("{}", serde_json::to_string_pretty(&employees)?);
            Ok(())
        }
    }
}

fn run(config: &Config, dry_run: bool) -> Result<()> {
    let store = LocalObjectStore::new(&config.store.root);
    let alerts = LogAlertChannel;
    tracing::debug!(root = %store.root().display(), dry_run, "object store ready");

    let result = Orchestrator::new(config, &store, &alerts)
        .with_options(RunOptions { dry_run })
        .run();

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
