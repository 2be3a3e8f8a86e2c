use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_tunnel_pool::prelude::{FleetConfig, RunnerPool};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Manage the runner pool outside of a scenario.
#[derive(Debug, Parser)]
#[command(about, long_about = None)]
struct Cli {
    /// Fleet configuration file, see `FT_FLEET_CONFIG`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Make sure that at least this many runners are registered and running
    Ensure {
        runners: usize,

        /// Registration token for the controller
        #[arg(env = "FT_REGISTRATION_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Stop, unregister and remove every runner
    Teardown,
    /// List the runners and their state
    Status,
}

#[derive(Tabled)]
struct RunnerRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Workspace")]
    workspace: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = FleetConfig::load(cli.config.as_deref()).context("Failed to load fleet configuration")?;
    config
        .check_prerequisites()
        .context("Missing prerequisite tooling")?;
    let mut pool = RunnerPool::open(Arc::new(config)).context("Failed to open the runner pool")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    match cli.command {
        Command::Ensure { runners, token } => {
            let report = runtime
                .block_on(pool.ensure(runners, &token))
                .with_context(|| format!("Failed to bring the pool up to {runners} runners"))?;
            println!(
                "Created {} runners, {} were already running",
                report.created.len(),
                report.kept
            );
        }
        Command::Teardown => {
            let removed = runtime.block_on(pool.teardown_all());
            println!("Removed {removed} runners");
        }
        Command::Status => {
            if pool.is_empty() {
                println!("No runners");
                return Ok(());
            }

            let rows = pool
                .runners()
                .map(|runner| RunnerRow {
                    index: runner.index(),
                    port: runner.port(),
                    pid: runner.pid().map(|pid| pid.to_string()).unwrap_or_default(),
                    state: runner.state().to_string(),
                    workspace: runner.workspace().display().to_string(),
                })
                .collect::<Vec<_>>();
            let mut table = Table::new(&rows);
            table.with(Style::modern());
            println!("{table}");
        }
    }

    Ok(())
}
