/// Returned when a single workload invocation exits unsuccessfully.
///
/// This is never fatal to a scenario. The execution record is still written and sibling runners
/// carry on, so callers are expected to log this error and move on to the next execution.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("Workload invocation '{invocation}' on runner {runner} failed: {reason}")]
pub struct WorkloadFailedError {
    runner: usize,
    invocation: String,
    reason: String,
}

impl WorkloadFailedError {
    pub fn new(runner: usize, invocation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            runner,
            invocation: invocation.into(),
            reason: reason.into(),
        }
    }

    pub fn runner(&self) -> usize {
        self.runner
    }

    pub fn invocation(&self) -> &str {
        &self.invocation
    }
}
