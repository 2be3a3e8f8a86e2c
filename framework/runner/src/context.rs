use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_tunnel_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use fleet_tunnel_instruments::ExecutionRecorder;
use fleet_tunnel_pool::prelude::{CommandTemplate, ProcessSet, RunnerPool, RunnerView, RuntimeConfig};
use parking_lot::Mutex;

/// Everything a timing policy needs to drive executions, passed explicitly to every policy and
/// execution.
#[derive(Debug)]
pub struct ScenarioContext {
    run_dir: PathBuf,
    job: PathBuf,
    run_command: CommandTemplate,
    env: HashMap<String, String>,
    runners: Vec<RunnerView>,
    recorder: Arc<ExecutionRecorder>,
    pool: Arc<tokio::sync::Mutex<RunnerPool>>,
    shutdown: ShutdownHandle,
    /// Process group of the execution currently running on each runner.
    in_flight: Mutex<BTreeMap<usize, i32>>,
}

impl ScenarioContext {
    pub fn new(
        run_dir: PathBuf,
        job: PathBuf,
        runtime: &RuntimeConfig,
        runners: Vec<RunnerView>,
        pool: Arc<tokio::sync::Mutex<RunnerPool>>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            recorder: Arc::new(ExecutionRecorder::new(run_dir.clone())),
            run_dir,
            job,
            run_command: runtime.run.clone(),
            env: runtime.env.clone(),
            runners,
            pool,
            shutdown,
            in_flight: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn job(&self) -> &Path {
        &self.job
    }

    pub fn run_command(&self) -> &CommandTemplate {
        &self.run_command
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// The runners selected for this scenario, in index order.
    pub fn runners(&self) -> &[RunnerView] {
        &self.runners
    }

    pub fn runner(&self, index: usize) -> Option<&RunnerView> {
        self.runners.iter().find(|r| r.index == index)
    }

    pub fn recorder(&self) -> &Arc<ExecutionRecorder> {
        &self.recorder
    }

    pub fn pool(&self) -> &Arc<tokio::sync::Mutex<RunnerPool>> {
        &self.pool
    }

    pub fn shutdown_listener(&self) -> DelegatedShutdownListener {
        self.shutdown.new_listener()
    }

    /// Whether the scenario has been asked to stop scheduling new executions.
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Stop scheduling new executions. Executions already running are left to finish.
    pub fn force_stop_scenario(&self) {
        self.shutdown.shutdown();
    }

    pub(crate) fn track(&self, runner: usize, pid: i32) {
        self.in_flight.lock().insert(runner, pid);
    }

    pub(crate) fn untrack(&self, runner: usize) {
        self.in_flight.lock().remove(&runner);
    }

    /// How many executions are running right now.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// The process groups of the executions currently running on the given runners.
    pub fn in_flight_processes(&self, runners: &[usize]) -> ProcessSet {
        let in_flight = self.in_flight.lock();
        let mut set = ProcessSet::new();
        for runner in runners {
            if let Some(pid) = in_flight.get(runner) {
                set.push(format!("runner {runner} workload"), *pid);
            }
        }
        set
    }
}
