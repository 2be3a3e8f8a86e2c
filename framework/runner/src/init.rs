use clap::Parser;

use crate::cli::FleetScenarioCli;

/// Initialise the CLI and logging for the Fleet Tunnel runner.
pub fn init() -> FleetScenarioCli {
    env_logger::init();

    FleetScenarioCli::parse()
}
