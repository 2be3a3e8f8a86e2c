//! Measurement for Fleet Tunnel scenarios.
//!
//! The [ExecutionRecorder] keeps the timing of every workload invocation and the
//! [MetricsCollector] samples the host while a scenario runs. Both only write into the scenario
//! run directory, the summariser reads the files back later.

mod collector;
mod family;
pub mod procfs;
mod recorder;
mod sampler;
mod sink;

pub use collector::{family_path, MetricsCollector};
pub use family::MetricFamily;
pub use recorder::ExecutionRecorder;
pub use sampler::{open_sampler, ProcSource, Sampler};
pub use sink::CsvSink;
