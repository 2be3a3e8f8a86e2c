use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

/// Summarise the execution records and host metrics of a scenario run.
#[derive(Debug, Parser)]
#[command(about, long_about = None)]
struct Args {
    /// The scenario run directory
    run_dir: PathBuf,

    /// Baseline duration in seconds to compare against, instead of the recorded baseline
    #[arg(long)]
    baseline: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let report = fleet_summariser::summarise_run(&args.run_dir, args.baseline)
        .with_context(|| format!("Failed to summarise {}", args.run_dir.display()))?;
    println!("{}", fleet_summariser::render_text(&report));

    Ok(())
}
