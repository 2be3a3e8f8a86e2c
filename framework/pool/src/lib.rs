//! Runner fleet management for Fleet Tunnel.
//!
//! A [RunnerPool](prelude::RunnerPool) owns a dense set of runners, each living in its own
//! workspace cloned from a cached template and bound to a port handed out by a
//! [PortAllocator](prelude::PortAllocator). The [RunnerLifecycle](prelude::RunnerLifecycle)
//! drives one runner at a time through the opaque runtime's register, start and unregister
//! commands, which are configured through [FleetConfig](prelude::FleetConfig).

mod config;
mod error;
mod lifecycle;
mod pool;
mod port;
mod process;
mod readiness;
mod runner;
mod template;

pub mod prelude {
    pub use crate::config::{
        CommandTemplate, CommandVars, ControllerConfig, FleetConfig, MetricsConfig, PathsConfig,
        PoolConfig, PortRange, ReadinessConfig, RuntimeConfig, FT_FLEET_CONFIG_ENV,
    };
    pub use crate::error::{FleetError, FleetResult};
    pub use crate::lifecycle::{
        index_from_workspace_name, workspace_name, RunnerLifecycle, REGISTER_LOG_FILE,
        UNREGISTER_LOG_FILE,
    };
    pub use crate::pool::{EnsureReport, RunnerPool};
    pub use crate::port::{next_free_port, PortAllocator, PortProbe, TcpPortProbe};
    pub use crate::process::{is_alive, signal_group, GroupSignal, ProcessSet, SuspendedProcesses};
    pub use crate::readiness::Readiness;
    pub use crate::runner::{
        Runner, RunnerRecord, RunnerState, RunnerView, RUNNER_LOG_FILE, RUNNER_RECORD_FILE,
    };
    pub use crate::template::{TemplateCache, READY_MARKER};
}
