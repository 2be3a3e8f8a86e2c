//! Data shared between the orchestrator, the instruments and the summariser.
//!
//! Everything in here is plain, serializable data. A scenario run directory can be re-read by
//! the summariser at any later point using only the types and layout helpers from this crate.

mod jsonl;
pub mod layout;
mod policy;
mod record;
mod run;

pub use jsonl::{append_jsonl, JsonlError, JsonlReader};
pub use policy::{FixedDurationPolicy, NoisyNeighborPolicy, OutagePolicy, TimingPolicy, WavePolicy};
pub use record::{load_execution_records, ExecutionRecord, BASELINE_INVOCATION};
pub use run::{
    append_run_summary, load_run_summary, load_summary_runs, store_run_summary,
    timestamped_run_id, ScenarioRun,
};
