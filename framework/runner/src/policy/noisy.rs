use std::sync::Arc;

use fleet_tunnel_summary_model::{ExecutionRecord, NoisyNeighborPolicy, BASELINE_INVOCATION};
use tokio::task::JoinSet;

use crate::context::ScenarioContext;
use crate::execution::{execute, OutputCapture};
use crate::policy::join_executions;

pub const CONTENDED_INVOCATION: &str = "contended";

/// Runner 1 executes alone with verbose output to set the baseline, then the other runners
/// execute together.
pub async fn run_noisy_neighbor(
    ctx: Arc<ScenarioContext>,
    policy: &NoisyNeighborPolicy,
) -> Vec<ExecutionRecord> {
    let baseline_runner = match ctx.runner(1).or_else(|| ctx.runners().first()) {
        Some(runner) => runner.clone(),
        None => {
            log::error!("No runners to take a baseline on");
            return Vec::new();
        }
    };
    if baseline_runner.index != 1 {
        log::warn!(
            "Runner 1 is not available, taking the baseline on runner {}",
            baseline_runner.index
        );
    }

    let mut records = Vec::new();
    match execute(&ctx, &baseline_runner, BASELINE_INVOCATION, OutputCapture::Verbose).await {
        Ok(record) => {
            log::info!(
                "Baseline on runner {} took {:.3}s",
                record.runner_id,
                record.duration_s
            );
            records.push(record);
        }
        Err(e) => {
            log::error!("Baseline could not be taken, skipping the contended phase: {e:?}");
            return records;
        }
    }

    if ctx.is_stopping() {
        log::info!("Scenario stopped after the baseline");
        return records;
    }

    let mut executions = JoinSet::new();
    for runner in ctx
        .runners()
        .iter()
        .filter(|r| policy.include_baseline || r.index != baseline_runner.index)
        .cloned()
    {
        let ctx = ctx.clone();
        executions.spawn(async move {
            execute(&ctx, &runner, CONTENDED_INVOCATION, OutputCapture::File).await
        });
    }
    log::info!("Contended phase started on {} runners", executions.len());

    join_executions(&mut executions, &mut records).await;
    records
}
