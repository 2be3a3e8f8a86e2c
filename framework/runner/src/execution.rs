use std::fs::File;
use std::io::Write as _;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use fleet_tunnel_core::prelude::WorkloadFailedError;
use fleet_tunnel_pool::prelude::{CommandVars, RunnerView};
use fleet_tunnel_summary_model::layout::output_log_file;
use fleet_tunnel_summary_model::ExecutionRecord;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::context::ScenarioContext;
use crate::types::FleetTunnelResult;

/// How the output of an execution is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCapture {
    /// Straight into the per-invocation log.
    File,
    /// Into the per-invocation log and, line by line, to the `workload::runner_<index>` log target.
    Verbose,
}

/// Run the workload once on one runner and record how long it took.
///
/// A workload that exits unsuccessfully is logged and recorded, it is not an error for the caller.
/// Errors are only returned if the workload could not be run or recorded at all.
pub async fn execute(
    ctx: &ScenarioContext,
    runner: &RunnerView,
    invocation: &str,
    capture: OutputCapture,
) -> FleetTunnelResult<ExecutionRecord> {
    let output_path = ctx
        .run_dir()
        .join(output_log_file(runner.index, invocation));
    let output = File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let vars = CommandVars {
        index: Some(runner.index),
        port: Some(runner.port),
        job: Some(ctx.job().to_path_buf()),
        workspace: Some(runner.workspace.clone()),
        ..Default::default()
    };
    let mut command = ctx.run_command().to_command(&vars, &runner.workspace)?;
    command
        .envs(ctx.env())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let forwarded_output = match capture {
        OutputCapture::File => {
            command
                .stdout(Stdio::from(output.try_clone()?))
                .stderr(Stdio::from(output));
            None
        }
        OutputCapture::Verbose => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            Some(output)
        }
    };

    let started_at_ms = chrono::Utc::now().timestamp_millis();
    let started = Instant::now();
    let mut child = command.spawn().with_context(|| {
        format!(
            "Failed to start invocation '{invocation}' on runner {}",
            runner.index
        )
    })?;

    let tracked = child
        .id()
        .and_then(|pid| i32::try_from(pid).ok())
        .map(|pid| InFlight::track(ctx, runner.index, pid));

    let forwarders = match forwarded_output {
        None => Vec::new(),
        Some(output) => {
            let output = Arc::new(parking_lot::Mutex::new(output));
            let target = format!("workload::runner_{}", runner.index);
            let mut forwarders = Vec::new();
            if let Some(stdout) = child.stdout.take() {
                forwarders.push(tokio::spawn(forward_lines(stdout, output.clone(), target.clone())));
            }
            if let Some(stderr) = child.stderr.take() {
                forwarders.push(tokio::spawn(forward_lines(stderr, output, target)));
            }
            forwarders
        }
    };

    let status = child.wait().await;
    let duration = started.elapsed();
    let ended_at_ms = chrono::Utc::now().timestamp_millis();
    drop(tracked);

    for forwarder in forwarders {
        let _ = forwarder.await;
    }

    let status = status.with_context(|| {
        format!(
            "Failed to wait for invocation '{invocation}' on runner {}",
            runner.index
        )
    })?;

    let record = ExecutionRecord {
        runner_id: runner.index,
        invocation: invocation.to_string(),
        started_at_ms,
        ended_at_ms,
        duration_s: duration.as_secs_f64(),
        exit_code: status.code(),
        success: status.success(),
    };
    ctx.recorder()
        .record(&record)
        .context("Failed to write execution record")?;

    if !status.success() {
        log::error!(
            "{}",
            WorkloadFailedError::new(runner.index, invocation, status.to_string())
        );
    }

    Ok(record)
}

/// Keeps an execution in the in-flight registry until dropped, including when the execution is
/// abandoned part way through.
struct InFlight<'a> {
    ctx: &'a ScenarioContext,
    runner: usize,
}

impl<'a> InFlight<'a> {
    fn track(ctx: &'a ScenarioContext, runner: usize, pid: i32) -> Self {
        ctx.track(runner, pid);
        Self { ctx, runner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ctx.untrack(self.runner);
    }
}

async fn forward_lines<R>(stream: R, output: Arc<parking_lot::Mutex<File>>, target: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Err(e) = writeln!(output.lock(), "{line}") {
            log::debug!("Failed to write workload output: {e}");
        }
        log::info!(target: &target, "{line}");
    }
}
