//! Scenario runner for Fleet Tunnel.
//!
//! A scenario binary defines its timing policy with a [prelude::ScenarioDefinitionBuilder] and
//! hands it to [prelude::run], which takes care of the runner pool, metrics and the summary.

mod cli;
mod context;
mod definition;
mod execution;
pub mod hooks;
mod init;
mod monitor;
pub mod policy;
mod progress;
mod run;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::FleetScenarioCli;
    pub use crate::context::ScenarioContext;
    pub use crate::definition::{PolicyHook, ScenarioDefinitionBuilder};
    pub use crate::execution::{execute, OutputCapture};
    pub use crate::hooks;
    pub use crate::init::init;
    pub use crate::policy::{drive, partition_waves};
    pub use crate::run::run;
    pub use crate::types::FleetTunnelResult;
}
