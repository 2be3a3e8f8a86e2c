use std::sync::Arc;

use fleet_tunnel_summary_model::{ExecutionRecord, WavePolicy};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinSet;

use crate::context::ScenarioContext;
use crate::execution::{execute, OutputCapture};
use crate::policy::{join_executions, policy_rng};

/// Split `count` runners into three wave sizes.
///
/// Each target proportion is jittered independently and the results re-normalized. The sizes
/// always sum to `count`, and every wave gets at least one runner once there are three or more.
pub fn partition_waves(count: usize, policy: &WavePolicy, rng: &mut impl Rng) -> [usize; 3] {
    if count == 0 {
        return [0; 3];
    }

    let jitter = policy.jitter.abs();
    let mut weights = policy
        .proportions
        .map(|p| (p + rng.gen_range(-jitter..=jitter)).max(0.0));
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        weights = [1.0; 3];
    }
    let total: f64 = weights.iter().sum();

    let mut sizes = [0usize; 3];
    let mut assigned = 0;
    for i in 0..2 {
        let size = (count as f64 * weights[i] / total).round() as usize;
        sizes[i] = size.min(count - assigned);
        assigned += sizes[i];
    }
    sizes[2] = count - assigned;

    if count >= 3 {
        for i in 0..3 {
            if sizes[i] == 0 {
                let donor = (0..3).max_by_key(|&j| sizes[j]).unwrap_or(2);
                sizes[donor] -= 1;
                sizes[i] = 1;
            }
        }
    }

    sizes
}

/// Launch three bursts of single executions with shrinking pauses between them, then wait for
/// every execution from every wave.
pub async fn run_wave(ctx: Arc<ScenarioContext>, policy: &WavePolicy) -> Vec<ExecutionRecord> {
    let mut rng = policy_rng(policy.seed, 0);
    let mut runners = ctx.runners().to_vec();
    runners.shuffle(&mut rng);
    let sizes = partition_waves(runners.len(), policy, &mut rng);
    log::info!("Wave sizes: {sizes:?}");

    let mut executions = JoinSet::new();
    let mut remaining = runners.into_iter();
    for (wave, (size, pause)) in sizes.into_iter().zip(policy.pauses()).enumerate() {
        if ctx.is_stopping() {
            log::info!("Scenario stopped, not launching wave {}", wave + 1);
            break;
        }

        let label = format!("wave{}", wave + 1);
        for runner in remaining.by_ref().take(size) {
            log::debug!("Launching {label} on runner {}", runner.index);
            let ctx = ctx.clone();
            let label = label.clone();
            executions.spawn(async move { execute(&ctx, &runner, &label, OutputCapture::File).await });
        }
        tokio::time::sleep(pause).await;
    }

    let mut records = Vec::new();
    match policy.straggler_timeout() {
        Some(timeout) => {
            let joined = tokio::time::timeout(timeout, join_executions(&mut executions, &mut records)).await;
            if joined.is_err() {
                log::warn!(
                    "Terminating {} executions still running after {}s",
                    executions.len(),
                    timeout.as_secs()
                );
                let indices = ctx.runners().iter().map(|r| r.index).collect::<Vec<_>>();
                ctx.in_flight_processes(&indices).kill();
                executions.abort_all();
                join_executions(&mut executions, &mut records).await;
            }
        }
        None => join_executions(&mut executions, &mut records).await,
    }
    records
}
