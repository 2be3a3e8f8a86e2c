//! The lifecycle of a single runner, from an empty workspace to a deleted one.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use url::Url;

use crate::config::{CommandTemplate, CommandVars, FleetConfig};
use crate::error::{FleetError, FleetResult};
use crate::port::{PortAllocator, PortProbe};
use crate::process::{is_alive, signal_group, GroupSignal};
use crate::readiness::{probe_readiness, Readiness};
use crate::runner::{Runner, RunnerState};
use crate::template::TemplateCache;

/// Captured output of the registration command, inside the workspace.
pub const REGISTER_LOG_FILE: &str = "register.log";
/// Captured output of the unregister command, inside the workspace.
pub const UNREGISTER_LOG_FILE: &str = "unregister.log";

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory name of the workspace for the runner with this index.
pub fn workspace_name(index: usize) -> String {
    format!("runner_{index}")
}

/// The runner index encoded in a workspace directory name.
pub fn index_from_workspace_name(name: &str) -> Option<usize> {
    name.strip_prefix("runner_")?
        .parse()
        .ok()
        .filter(|index| *index > 0)
}

/// Drives runners through provisioning, registration, start-up, suspension and removal.
#[derive(Debug, Clone)]
pub struct RunnerLifecycle {
    config: Arc<FleetConfig>,
    template: TemplateCache,
}

impl RunnerLifecycle {
    pub fn new(config: Arc<FleetConfig>) -> Self {
        let template = TemplateCache::new(
            config.paths.template_dir.clone(),
            config.runtime.template_source.clone(),
            config.runtime.install.clone(),
        );
        Self { config, template }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn workspace_path(&self, index: usize) -> PathBuf {
        self.config.paths.runner_root.join(workspace_name(index))
    }

    /// Create a fresh workspace for a runner from the cached template.
    ///
    /// Any stale workspace at the same index is discarded first.
    pub async fn provision(&self, index: usize, port: u16) -> FleetResult<Runner> {
        self.template.ensure().await?;

        let workspace = self.workspace_path(index);
        if workspace.exists() {
            log::warn!(
                "Discarding stale workspace for runner {index} at {}",
                workspace.display()
            );
            tokio::fs::remove_dir_all(&workspace).await?;
        }

        self.template.clone_into(&workspace).await?;
        let runner = Runner::new(index, port, workspace);
        runner.persist()?;
        log::debug!("Provisioned runner {index} with port {port}");
        Ok(runner)
    }

    /// Register the runner with the controller.
    pub async fn register(&self, runner: &mut Runner, url: &Url, token: &str) -> FleetResult<()> {
        runner.transition(RunnerState::Registering)?;
        log::info!(
            "Registering runner {} on port {} with {url}",
            runner.index(),
            runner.port()
        );

        let vars = CommandVars {
            url: Some(url.to_string()),
            token: Some(token.to_string()),
            ..self.vars_for(runner)
        };
        let log_path = runner.workspace().join(REGISTER_LOG_FILE);
        let outcome = self
            .command(&self.config.runtime.register, &vars, runner.workspace(), &log_path)
            .and_then(|mut command| Ok(command.stdin(Stdio::null()).spawn()?));

        let status = match outcome {
            Ok(mut child) => child.wait().await.map_err(FleetError::from),
            Err(e) => Err(e),
        };

        let reason = match status {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => format!("{status}, see {}", log_path.display()),
            Err(e) => e.to_string(),
        };

        runner.transition(RunnerState::Failed)?;
        Err(FleetError::Registration {
            index: runner.index(),
            port: runner.port(),
            reason,
        })
    }

    /// Launch the runner in the background as the leader of a new process group.
    ///
    /// Returns as soon as the process has been spawned, use [RunnerLifecycle::confirm_started] to
    /// find out whether it came up.
    pub async fn start(&self, runner: &mut Runner) -> FleetResult<()> {
        runner.transition(RunnerState::Starting)?;

        let vars = self.vars_for(runner);
        let log_path = runner.log_path();
        let spawned = self
            .command(&self.config.runtime.start, &vars, runner.workspace(), &log_path)
            .and_then(|mut command| {
                command.stdin(Stdio::null()).kill_on_drop(false);
                #[cfg(unix)]
                command.process_group(0);
                Ok(command.spawn()?)
            });

        match spawned {
            Ok(child) => {
                runner.set_process(child);
                runner.persist()?;
                log::info!(
                    "Started runner {} on port {} (pid {:?})",
                    runner.index(),
                    runner.port(),
                    runner.pid()
                );
                Ok(())
            }
            Err(e) => {
                runner.transition(RunnerState::Failed)?;
                Err(FleetError::Start {
                    index: runner.index(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Watch a started runner for up to `grace` and move it to running if it was accepted.
    pub async fn confirm_started(
        &self,
        runner: &mut Runner,
        grace: Duration,
    ) -> FleetResult<Readiness> {
        let settings = crate::config::ReadinessConfig {
            grace_ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            ..self.config.readiness.clone()
        };
        let readiness = probe_readiness(runner, &settings).await;

        match readiness {
            Readiness::Ready => {
                log::debug!("Runner {} is accepting connections", runner.index());
                runner.transition(RunnerState::Running)?;
            }
            Readiness::Unconfirmed => {
                log::warn!(
                    "Runner {} did not confirm port {} within {:?}, assuming it started",
                    runner.index(),
                    runner.port(),
                    grace
                );
                runner.transition(RunnerState::Running)?;
            }
            Readiness::PortConflict | Readiness::Exited(_) => {}
        }

        Ok(readiness)
    }

    /// Stop the runner's process group.
    pub fn suspend(&self, runner: &mut Runner) -> FleetResult<()> {
        let pid = runner.pid().ok_or(FleetError::NotRunning {
            index: runner.index(),
        })?;
        signal_group(pid, GroupSignal::Stop)?;
        runner.transition(RunnerState::Suspended)
    }

    /// Continue the runner's process group.
    pub fn resume(&self, runner: &mut Runner) -> FleetResult<()> {
        let pid = runner.pid().ok_or(FleetError::NotRunning {
            index: runner.index(),
        })?;
        signal_group(pid, GroupSignal::Continue)?;
        runner.transition(RunnerState::Running)
    }

    /// Terminate the runner's process group, escalating to a kill if it does not exit in time.
    pub async fn stop_process(&self, runner: &mut Runner) {
        let Some(pid) = runner.pid() else {
            return;
        };

        // A stopped group would never act on the terminate signal.
        let _ = signal_group(pid, GroupSignal::Continue);
        if let Err(e) = signal_group(pid, GroupSignal::Terminate) {
            log::debug!("Runner {} was already gone: {e}", runner.index());
        }

        let exited = match runner.child_mut() {
            Some(child) => timeout(STOP_TIMEOUT, child.wait()).await.is_ok(),
            None => wait_for_exit(pid, STOP_TIMEOUT).await,
        };

        if !exited {
            log::warn!(
                "Runner {} did not exit within {STOP_TIMEOUT:?}, killing it",
                runner.index()
            );
            let _ = signal_group(pid, GroupSignal::Kill);
            if let Some(mut child) = runner.take_child() {
                let _ = child.wait().await;
            }
        }

        runner.clear_process();
        if let Err(e) = runner.persist() {
            log::warn!("Failed to record that runner {} stopped: {e}", runner.index());
        }
    }

    /// Unregister the runner from the controller.
    ///
    /// Best-effort: failures are logged and the runner still ends up terminated, since removing
    /// the workspace makes it unreachable either way.
    pub async fn unregister(&self, runner: &mut Runner) {
        if runner.state().can_transition_to(RunnerState::Unregistering) {
            if let Err(e) = runner.transition(RunnerState::Unregistering) {
                log::warn!("{e}");
            }
        }

        match self.run_unregister(runner).await {
            Ok(()) => log::info!("Unregistered runner {}", runner.index()),
            Err(e) => log::warn!("{e}, continuing with teardown"),
        }

        tokio::time::sleep(self.config.runtime.unregister_settle()).await;

        if runner.state() == RunnerState::Unregistering {
            if let Err(e) = runner.transition(RunnerState::Terminated) {
                log::warn!("{e}");
            }
        }
    }

    async fn run_unregister(&self, runner: &Runner) -> FleetResult<()> {
        let unregister_error = |reason: String| FleetError::Unregister {
            index: runner.index(),
            reason,
        };

        let vars = self.vars_for(runner);
        let log_path = runner.workspace().join(UNREGISTER_LOG_FILE);
        let mut child = self
            .command(&self.config.runtime.unregister, &vars, runner.workspace(), &log_path)?
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| unregister_error(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let reply = format!("{}\n", self.config.runtime.unregister_reply);
            if let Err(e) = stdin.write_all(reply.as_bytes()).await {
                log::debug!("Unregister command closed its prompt early: {e}");
            }
        }

        let limit = self.config.runtime.unregister_timeout();
        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(unregister_error(format!(
                "{status}, see {}",
                log_path.display()
            ))),
            Ok(Err(e)) => Err(unregister_error(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                Err(unregister_error(format!("timed out after {limit:?}")))
            }
        }
    }

    /// Delete the runner's workspace. Succeeds if it is already gone.
    pub async fn teardown(&self, index: usize) -> FleetResult<()> {
        let workspace = self.workspace_path(index);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {
                log::debug!("Removed workspace {}", workspace.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop, unregister and delete a runner.
    pub async fn retire(&self, runner: &mut Runner) -> FleetResult<()> {
        self.stop_process(runner).await;
        self.unregister(runner).await;
        self.teardown(runner.index()).await
    }

    /// Bring up one runner, moving on to the next free port whenever the runner reports a port
    /// conflict.
    ///
    /// A port that was tried is never handed out again by `ports`, so conflicting candidates are
    /// not retried within the batch. Any other failure is returned and leaves the failed runner's
    /// workspace in place for inspection.
    pub async fn launch<P: PortProbe>(
        &self,
        index: usize,
        ports: &mut PortAllocator<P>,
        url: &Url,
        token: &str,
    ) -> FleetResult<Runner> {
        loop {
            let port = ports.next_free_port()?;
            let mut runner = self.provision(index, port).await?;
            self.register(&mut runner, url, token).await?;
            self.start(&mut runner).await?;

            match self
                .confirm_started(&mut runner, self.config.readiness.grace())
                .await?
            {
                Readiness::Ready | Readiness::Unconfirmed => return Ok(runner),
                Readiness::PortConflict => {
                    log::warn!(
                        "Runner {index} hit a port conflict on {port}, retrying on the next port"
                    );
                    self.retire(&mut runner).await?;
                }
                Readiness::Exited(code) => {
                    runner.clear_process();
                    runner.transition(RunnerState::Failed)?;
                    self.unregister(&mut runner).await;
                    return Err(FleetError::Start {
                        index,
                        reason: format!(
                            "exited with code {code:?}, see {}",
                            runner.log_path().display()
                        ),
                    });
                }
            }
        }
    }

    fn vars_for(&self, runner: &Runner) -> CommandVars {
        CommandVars {
            index: Some(runner.index()),
            port: Some(runner.port()),
            workspace: Some(runner.workspace().to_path_buf()),
            ..Default::default()
        }
    }

    /// Build a runtime command with its output sent to `log_path`.
    fn command(
        &self,
        template: &CommandTemplate,
        vars: &CommandVars,
        workspace: &Path,
        log_path: &Path,
    ) -> FleetResult<tokio::process::Command> {
        let stdout = File::create(log_path)?;
        let stderr = stdout.try_clone()?;
        let mut command = template.to_command(vars, workspace)?;
        command
            .envs(&self.config.runtime.env)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        Ok(command)
    }
}

async fn wait_for_exit(pid: i32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while is_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_names_round_trip() {
        assert_eq!(workspace_name(12), "runner_12");
        assert_eq!(index_from_workspace_name("runner_12"), Some(12));
        assert_eq!(index_from_workspace_name("runner_0"), None);
        assert_eq!(index_from_workspace_name(".template"), None);
        assert_eq!(index_from_workspace_name("runner_x"), None);
    }

    #[tokio::test]
    async fn teardown_of_missing_workspace_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.paths.runner_root = dir.path().to_path_buf();
        let lifecycle = RunnerLifecycle::new(Arc::new(config));

        lifecycle.teardown(3).await.unwrap();
        std::fs::create_dir_all(lifecycle.workspace_path(3).join("bin")).unwrap();
        lifecycle.teardown(3).await.unwrap();
        assert!(!lifecycle.workspace_path(3).exists());
        lifecycle.teardown(3).await.unwrap();
    }

    #[test]
    fn suspend_without_process_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = RunnerLifecycle::new(Arc::new(FleetConfig::default()));
        let mut runner = Runner::new(2, 8101, dir.path().to_path_buf());
        assert!(matches!(
            lifecycle.suspend(&mut runner),
            Err(FleetError::NotRunning { index: 2 })
        ));
    }
}
