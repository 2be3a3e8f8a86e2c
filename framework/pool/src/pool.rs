use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::lifecycle::{index_from_workspace_name, RunnerLifecycle};
use crate::port::{PortAllocator, PortProbe};
use crate::process::{is_alive, ProcessSet, SuspendedProcesses};
use crate::runner::{Runner, RunnerState, RunnerView};

/// What a call to [RunnerPool::ensure] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureReport {
    /// Indices of the runners that were launched by this call.
    pub created: Vec<usize>,
    /// Number of live runners that were already there and left untouched.
    pub kept: usize,
}

/// The runners managed on this host, addressed by index starting at 1.
#[derive(Debug)]
pub struct RunnerPool {
    lifecycle: Arc<RunnerLifecycle>,
    runners: BTreeMap<usize, Runner>,
    suspended: Option<SuspendedProcesses>,
}

impl RunnerPool {
    /// An empty pool that does not look at the runner root.
    pub fn new(config: Arc<FleetConfig>) -> Self {
        Self {
            lifecycle: Arc::new(RunnerLifecycle::new(config)),
            runners: BTreeMap::new(),
            suspended: None,
        }
    }

    /// Open the pool, re-attaching to runners that earlier invocations left in the runner root.
    pub fn open(config: Arc<FleetConfig>) -> FleetResult<Self> {
        let mut pool = Self::new(config);
        for index in pool.workspace_indices()? {
            let workspace = pool.lifecycle.workspace_path(index);
            let Some(record) = Runner::load_record(&workspace)? else {
                continue;
            };

            let mut runner = Runner::attach(record, workspace);
            if !runner.state().is_terminal() && !runner.pid().is_some_and(is_alive) {
                log::warn!(
                    "Runner {index} was {} but its process is gone",
                    runner.state()
                );
                runner.clear_process();
                runner.transition(RunnerState::Failed)?;
            }
            pool.runners.insert(index, runner);
        }

        if !pool.runners.is_empty() {
            log::info!("Found {} existing runners", pool.runners.len());
        }
        Ok(pool)
    }

    pub fn lifecycle(&self) -> &RunnerLifecycle {
        &self.lifecycle
    }

    pub fn capacity(&self) -> usize {
        self.lifecycle.config().capacity()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Runner> {
        self.runners.get(&index)
    }

    pub fn runners(&self) -> impl Iterator<Item = &Runner> {
        self.runners.values()
    }

    pub fn highest_index(&self) -> usize {
        self.runners.keys().next_back().copied().unwrap_or(0)
    }

    /// Number of runners that currently have a live process.
    pub fn active_count(&self) -> usize {
        self.runners
            .values()
            .filter(|r| r.state().is_active())
            .count()
    }

    /// Views of the active runners with an index up to `count`, in index order.
    pub fn views(&self, count: usize) -> Vec<RunnerView> {
        self.runners
            .range(1..=count)
            .map(|(_, runner)| runner)
            .filter(|runner| runner.state().is_active())
            .map(RunnerView::from)
            .collect()
    }

    /// Make sure runners `1..=target` exist, launching only the ones that are missing.
    ///
    /// Live runners are never touched. On failure the runners launched so far are kept.
    pub async fn ensure(&mut self, target: usize, token: &str) -> FleetResult<EnsureReport> {
        let ports = PortAllocator::new(self.lifecycle.config().ports);
        self.ensure_with_ports(target, token, ports).await
    }

    pub async fn ensure_with_ports<P: PortProbe>(
        &mut self,
        target: usize,
        token: &str,
        mut ports: PortAllocator<P>,
    ) -> FleetResult<EnsureReport> {
        let capacity = self.capacity();
        if target > capacity {
            return Err(FleetError::CapacityExceeded {
                requested: target,
                capacity,
            });
        }

        ports.reserve(
            self.runners
                .values()
                .filter(|r| !r.state().is_terminal())
                .map(Runner::port),
        );

        let missing = (1..=target)
            .filter(|index| {
                self.runners
                    .get(index)
                    .map_or(true, |runner| runner.state().is_terminal())
            })
            .collect::<Vec<_>>();

        let mut report = EnsureReport {
            created: Vec::with_capacity(missing.len()),
            kept: target - missing.len(),
        };
        if missing.is_empty() {
            log::info!("Pool already has {target} runners");
            return Ok(report);
        }

        log::info!(
            "Scaling pool to {target} runners, launching {}",
            missing.len()
        );
        let url = self.lifecycle.config().controller.url.clone();
        for index in missing {
            if self.runners.remove(&index).is_some() {
                log::info!("Replacing failed runner {index}");
            }

            match self.lifecycle.launch(index, &mut ports, &url, token).await {
                Ok(runner) => {
                    self.runners.insert(index, runner);
                    report.created.push(index);
                }
                Err(e) => {
                    log::error!(
                        "Scale-up stopped at runner {index} after launching {}: {e}",
                        report.created.len()
                    );
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    /// Suspend the given runners along with any extra process groups, as one batch.
    ///
    /// The batch is held by the pool until [RunnerPool::resume_all] continues exactly the same
    /// set. Returns the number of process groups that were stopped.
    pub fn suspend_runners(&mut self, indices: &[usize], extra: ProcessSet) -> usize {
        if self.suspended.is_some() {
            log::warn!("A suspended batch is still held, resuming it first");
            self.resume_all();
        }

        let mut set = ProcessSet::new();
        for index in indices {
            match self.runners.get(index) {
                Some(runner) if runner.state() == RunnerState::Running => {
                    if let Some(pid) = runner.pid() {
                        set.push(format!("runner {index}"), pid);
                    }
                }
                _ => log::debug!("Runner {index} is not running, not suspending it"),
            }
        }
        set.extend(extra);

        let suspended = set.suspend();
        let stopped = suspended.pids().into_iter().collect::<BTreeSet<_>>();
        for runner in self.runners.values_mut() {
            if runner.pid().is_some_and(|pid| stopped.contains(&pid)) {
                if let Err(e) = runner.transition(RunnerState::Suspended) {
                    log::warn!("{e}");
                }
            }
        }

        let count = suspended.len();
        self.suspended = Some(suspended);
        count
    }

    pub fn suspend_all(&mut self) -> usize {
        let indices = self.runners.keys().copied().collect::<Vec<_>>();
        self.suspend_runners(&indices, ProcessSet::new())
    }

    /// Resume the batch captured by the last suspend. Returns the PIDs that were continued.
    pub fn resume_all(&mut self) -> Vec<i32> {
        let Some(suspended) = self.suspended.take() else {
            log::debug!("Nothing is suspended");
            return Vec::new();
        };

        let resumed = suspended.resume();
        for runner in self.runners.values_mut() {
            if runner.state() == RunnerState::Suspended {
                if let Err(e) = runner.transition(RunnerState::Running) {
                    log::warn!("{e}");
                }
            }
        }
        resumed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Tear down every runner up to the pool capacity, plus any workspaces left over beyond it.
    ///
    /// Each runner is handled independently and failures are only logged, so this is safe to
    /// call on an empty or half-built pool, and again after a previous teardown failed.
    /// Returns the number of runners removed.
    pub async fn teardown_all(&mut self) -> usize {
        if self.suspended.is_some() {
            self.resume_all();
        }

        let mut indices = (1..=self.capacity()).collect::<BTreeSet<_>>();
        match self.workspace_indices() {
            Ok(found) => indices.extend(found),
            Err(e) => log::warn!("Could not list runner workspaces: {e}"),
        }

        let mut removed = 0;
        for index in indices {
            let runner = match self.runners.remove(&index) {
                Some(runner) => Some(runner),
                None => self.attach_leftover(index),
            };

            let result = match runner {
                Some(mut runner) => {
                    log::info!("Tearing down runner {index}");
                    self.lifecycle.retire(&mut runner).await.map(|_| true)
                }
                None => {
                    let existed = self.lifecycle.workspace_path(index).exists();
                    self.lifecycle.teardown(index).await.map(|_| existed)
                }
            };

            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Failed to tear down runner {index}: {e}"),
            }
        }

        log::info!("Tore down {removed} runners");
        removed
    }

    fn attach_leftover(&self, index: usize) -> Option<Runner> {
        let workspace = self.lifecycle.workspace_path(index);
        match Runner::load_record(&workspace) {
            Ok(record) => record.map(|record| Runner::attach(record, workspace)),
            Err(e) => {
                log::warn!("Ignoring unreadable record for runner {index}: {e}");
                None
            }
        }
    }

    fn workspace_indices(&self) -> FleetResult<BTreeSet<usize>> {
        let root = &self.lifecycle.config().paths.runner_root;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(index) = entry.file_name().to_str().and_then(index_from_workspace_name) {
                indices.insert(index);
            }
        }
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortRange;

    fn config_in(root: &std::path::Path) -> Arc<FleetConfig> {
        let mut config = FleetConfig::default();
        config.paths.runner_root = root.join("runners");
        config.paths.template_dir = root.join("runners/.template");
        config.ports = PortRange::new(9100, 9103);
        Arc::new(config)
    }

    #[tokio::test]
    async fn ensure_beyond_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = RunnerPool::new(config_in(dir.path()));
        let err = pool.ensure(5, "token").await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::CapacityExceeded {
                requested: 5,
                capacity: 4
            }
        ));
    }

    #[tokio::test]
    async fn ensure_zero_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = RunnerPool::new(config_in(dir.path()));
        let report = pool.ensure(0, "token").await.unwrap();
        assert_eq!(report, EnsureReport::default());
        assert!(pool.is_empty());
    }

    #[test]
    fn open_marks_dead_runners_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let workspace = config.paths.runner_root.join("runner_2");
        std::fs::create_dir_all(&workspace).unwrap();
        let mut runner = Runner::new(2, 9101, workspace);
        runner.transition(RunnerState::Registering).unwrap();

        let pool = RunnerPool::open(config).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.highest_index(), 2);
        assert_eq!(pool.get(2).unwrap().state(), RunnerState::Failed);
        assert!(pool.views(4).is_empty());
    }

    #[test]
    fn resume_without_suspend_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = RunnerPool::new(config_in(dir.path()));
        assert!(pool.resume_all().is_empty());
        assert!(!pool.is_suspended());
    }
}
