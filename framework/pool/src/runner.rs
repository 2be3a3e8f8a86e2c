use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Child;

use crate::error::{FleetError, FleetResult};

/// Name of the file, inside each workspace, that persists the [RunnerRecord].
pub const RUNNER_RECORD_FILE: &str = "runner.json";
/// Name of the file, inside each workspace, that the runner process writes its output to.
pub const RUNNER_LOG_FILE: &str = "runner.log";

/// Lifecycle state of one runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Provisioning,
    Registering,
    Starting,
    Running,
    Suspended,
    Unregistering,
    Terminated,
    Failed,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunnerState::Terminated | RunnerState::Failed)
    }

    /// Whether the runner has a live process that should be signalled and torn down.
    pub fn is_active(self) -> bool {
        matches!(self, RunnerState::Running | RunnerState::Suspended)
    }

    pub fn can_transition_to(self, next: RunnerState) -> bool {
        use RunnerState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Provisioning, Registering)
                | (Registering, Starting)
                | (Starting, Running)
                | (Running, Suspended)
                | (Suspended, Running)
                | (Starting | Running | Suspended, Unregistering)
                | (Unregistering, Terminated)
                | (_, Failed)
        )
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Provisioning => "provisioning",
            RunnerState::Registering => "registering",
            RunnerState::Starting => "starting",
            RunnerState::Running => "running",
            RunnerState::Suspended => "suspended",
            RunnerState::Unregistering => "unregistering",
            RunnerState::Terminated => "terminated",
            RunnerState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// The persisted identity of a runner.
///
/// The PID captured at start is the only identity used to signal the runner later on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub index: usize,
    pub port: u16,
    pub pid: Option<i32>,
    pub state: RunnerState,
}

/// One runner owned by the pool.
#[derive(Debug)]
pub struct Runner {
    record: RunnerRecord,
    workspace: PathBuf,
    /// Only present for runners started by this process.
    child: Option<Child>,
}

impl Runner {
    pub(crate) fn new(index: usize, port: u16, workspace: PathBuf) -> Self {
        Self {
            record: RunnerRecord {
                index,
                port,
                pid: None,
                state: RunnerState::Provisioning,
            },
            workspace,
            child: None,
        }
    }

    /// Re-attach to a runner that was started by an earlier invocation.
    pub(crate) fn attach(record: RunnerRecord, workspace: PathBuf) -> Self {
        Self {
            record,
            workspace,
            child: None,
        }
    }

    pub fn index(&self) -> usize {
        self.record.index
    }

    pub fn port(&self) -> u16 {
        self.record.port
    }

    pub fn pid(&self) -> Option<i32> {
        self.record.pid
    }

    pub fn state(&self) -> RunnerState {
        self.record.state
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn log_path(&self) -> PathBuf {
        self.workspace.join(RUNNER_LOG_FILE)
    }

    pub fn record(&self) -> &RunnerRecord {
        &self.record
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub(crate) fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    pub(crate) fn set_process(&mut self, child: Child) {
        self.record.pid = child.id().and_then(|pid| i32::try_from(pid).ok());
        self.child = Some(child);
    }

    pub(crate) fn clear_process(&mut self) {
        self.record.pid = None;
        self.child = None;
    }

    /// Move to the next lifecycle state, rejecting transitions the state machine does not allow.
    pub(crate) fn transition(&mut self, next: RunnerState) -> FleetResult<()> {
        let current = self.record.state;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                index: self.record.index,
                from: current,
                to: next,
            });
        }

        log::debug!("Runner {} {current} -> {next}", self.record.index);
        self.record.state = next;
        self.persist()
    }

    /// Write the [RunnerRecord] into the workspace. Skipped once the workspace has been removed.
    pub(crate) fn persist(&self) -> FleetResult<()> {
        if !self.workspace.exists() {
            return Ok(());
        }
        let content = serde_json::to_vec_pretty(&self.record)?;
        std::fs::write(self.workspace.join(RUNNER_RECORD_FILE), content)?;
        Ok(())
    }

    pub(crate) fn load_record(workspace: &Path) -> FleetResult<Option<RunnerRecord>> {
        let path = workspace.join(RUNNER_RECORD_FILE);
        match std::fs::read(&path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A cheap, cloneable view of a runner for code that executes workloads against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerView {
    pub index: usize,
    pub port: u16,
    pub pid: Option<i32>,
    pub workspace: PathBuf,
}

impl From<&Runner> for RunnerView {
    fn from(runner: &Runner) -> Self {
        Self {
            index: runner.index(),
            port: runner.port(),
            pid: runner.pid(),
            workspace: runner.workspace().to_path_buf(),
        }
    }
}
