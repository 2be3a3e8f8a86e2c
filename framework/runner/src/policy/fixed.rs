use std::sync::Arc;
use std::time::Duration;

use fleet_tunnel_pool::prelude::RunnerView;
use fleet_tunnel_summary_model::{ExecutionRecord, FixedDurationPolicy};
use rand::rngs::StdRng;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::context::ScenarioContext;
use crate::execution::{execute, OutputCapture};
use crate::policy::{policy_rng, PauseGate};

/// Every runner repeats the workload until the deadline, pausing a random interval between
/// executions.
pub async fn run_fixed_duration(
    ctx: Arc<ScenarioContext>,
    policy: &FixedDurationPolicy,
) -> Vec<ExecutionRecord> {
    let deadline = Instant::now() + policy.duration();
    repeat_on_all(ctx, policy, deadline, PauseGate::open()).await
}

pub(crate) async fn repeat_on_all(
    ctx: Arc<ScenarioContext>,
    policy: &FixedDurationPolicy,
    deadline: Instant,
    gate: PauseGate,
) -> Vec<ExecutionRecord> {
    let bounds = policy.interval_bounds();

    let mut loops = JoinSet::new();
    for runner in ctx.runners().iter().cloned() {
        let rng = policy_rng(policy.seed, runner.index as u64);
        loops.spawn(repeat_loop(ctx.clone(), runner, deadline, bounds, rng, gate.clone()));
    }

    let mut records = Vec::new();
    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(mut loop_records) => records.append(&mut loop_records),
            Err(e) => log::error!("Repeat loop failed: {e}"),
        }
    }
    records
}

async fn repeat_loop(
    ctx: Arc<ScenarioContext>,
    runner: RunnerView,
    deadline: Instant,
    bounds: (Duration, Duration),
    mut rng: StdRng,
    mut gate: PauseGate,
) -> Vec<ExecutionRecord> {
    let mut shutdown = ctx.shutdown_listener();
    let mut records = Vec::new();

    for invocation in 1u64.. {
        gate.wait_open().await;
        if ctx.is_stopping() || Instant::now() >= deadline {
            break;
        }

        match execute(&ctx, &runner, &invocation.to_string(), OutputCapture::File).await {
            Ok(record) => records.push(record),
            Err(e) => {
                log::error!("Stopping runner {} after it could not execute: {e:?}", runner.index);
                break;
            }
        }

        let interval = next_interval(&mut rng, bounds);
        if Instant::now() + interval >= deadline {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for_shutdown() => break,
        }
    }

    log::debug!(
        "Runner {} finished after {} executions",
        runner.index,
        records.len()
    );
    records
}

pub(crate) fn next_interval(rng: &mut impl Rng, (min, max): (Duration, Duration)) -> Duration {
    let min = min.as_millis() as u64;
    let max = max.as_millis() as u64;
    Duration::from_millis(rng.gen_range(min..=max.max(min)))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn intervals_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let bounds = (Duration::from_millis(100), Duration::from_millis(250));
        for _ in 0..500 {
            let interval = next_interval(&mut rng, bounds);
            assert!(interval >= bounds.0 && interval <= bounds.1, "{interval:?}");
        }
    }

    #[test]
    fn equal_bounds_give_a_fixed_interval() {
        let mut rng = StdRng::seed_from_u64(3);
        let bounds = (Duration::from_millis(40), Duration::from_millis(40));
        assert_eq!(next_interval(&mut rng, bounds), Duration::from_millis(40));
    }
}
