use crate::runner::RunnerState;

/// Errors from managing the runner fleet.
///
/// [FleetError::PortConflict] is the only retryable variant, the launch loop handles it by moving
/// on to the next port. Everything else aborts the scale-up that raised it.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("No free port left in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },
    #[error("Failed to provision runner template: {reason}")]
    Provision { reason: String },
    #[error("Failed to register runner {index} on port {port}: {reason}")]
    Registration {
        index: usize,
        port: u16,
        reason: String,
    },
    #[error("Runner {index} could not bind port {port}: address already in use")]
    PortConflict { index: usize, port: u16 },
    #[error("Runner {index} failed to start: {reason}")]
    Start { index: usize, reason: String },
    #[error("Failed to unregister runner {index}: {reason}")]
    Unregister { index: usize, reason: String },
    #[error("Runner {index} has no running process")]
    NotRunning { index: usize },
    #[error("Requested {requested} runners but the pool capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("Runner {index} cannot move from {from} to {to}")]
    InvalidTransition {
        index: usize,
        from: RunnerState,
        to: RunnerState,
    },
    #[error("Failed to signal process group {pid}: {reason}")]
    Signal { pid: i32, reason: String },
    #[error("Invalid fleet configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FleetError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::PortConflict { .. })
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
