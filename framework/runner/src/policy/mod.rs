//! The timing policies that decide when, and on which runners, the workload is executed.
//!
//! Every policy fans executions out over [tokio::task::JoinSet]s and waits for all of them. An
//! execution that fails, or whose task panics, is logged and never cancels its siblings.

mod fixed;
mod noisy;
mod outage;
mod wave;

use std::sync::Arc;

use fleet_tunnel_summary_model::{ExecutionRecord, TimingPolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::context::ScenarioContext;
use crate::types::FleetTunnelResult;

pub use fixed::run_fixed_duration;
pub use noisy::run_noisy_neighbor;
pub use outage::run_outage;
pub use wave::{partition_waves, run_wave};

/// Run the policy against the runners in the context until it is complete.
///
/// Returns the records of every execution that ran, in completion order.
pub async fn drive(ctx: Arc<ScenarioContext>, policy: &TimingPolicy) -> Vec<ExecutionRecord> {
    log::info!(
        "Driving {} runners with the {} policy",
        ctx.runners().len(),
        policy.name()
    );
    match policy {
        TimingPolicy::FixedDuration(p) => run_fixed_duration(ctx, p).await,
        TimingPolicy::Outage(p) => run_outage(ctx, p).await,
        TimingPolicy::Wave(p) => run_wave(ctx, p).await,
        TimingPolicy::NoisyNeighbor(p) => run_noisy_neighbor(ctx, p).await,
    }
}

/// A seeded source when a seed is given, so that runs can be reproduced. Each `stream` gets its
/// own sequence from the same seed.
pub(crate) fn policy_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_entropy(),
    }
}

pub(crate) async fn join_executions(
    set: &mut JoinSet<FleetTunnelResult<ExecutionRecord>>,
    records: &mut Vec<ExecutionRecord>,
) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(record)) => records.push(record),
            Ok(Err(e)) => log::error!("Execution could not be run: {e:?}"),
            Err(e) if e.is_cancelled() => log::warn!("Execution was abandoned"),
            Err(e) => log::error!("Execution task failed: {e}"),
        }
    }
}

/// Held by repeat loops, which wait here before starting each new execution.
#[derive(Debug, Clone, Default)]
pub(crate) struct PauseGate(Option<watch::Receiver<bool>>);

impl PauseGate {
    /// A gate that is never closed.
    pub(crate) fn open() -> Self {
        Self(None)
    }

    pub(crate) async fn wait_open(&mut self) {
        if let Some(paused) = &mut self.0 {
            // A dropped switch can not close the gate again.
            let _ = paused.wait_for(|paused| !*paused).await;
        }
    }
}

#[derive(Debug)]
pub(crate) struct PauseSwitch(watch::Sender<bool>);

impl PauseSwitch {
    pub(crate) fn new() -> (Self, PauseGate) {
        let (sender, receiver) = watch::channel(false);
        (Self(sender), PauseGate(Some(receiver)))
    }

    pub(crate) fn pause(&self) {
        self.0.send_replace(true);
    }

    pub(crate) fn resume(&self) {
        self.0.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;

    use super::*;

    #[test]
    fn seeded_streams_are_reproducible_and_distinct() {
        let a: Vec<u32> = policy_rng(Some(9), 1).sample_iter(rand::distributions::Standard).take(4).collect();
        let b: Vec<u32> = policy_rng(Some(9), 1).sample_iter(rand::distributions::Standard).take(4).collect();
        let c: Vec<u32> = policy_rng(Some(9), 2).sample_iter(rand::distributions::Standard).take(4).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn closed_gate_holds_until_resumed() {
        let (switch, mut gate) = PauseSwitch::new();
        switch.pause();

        let waiting = tokio::spawn(async move { gate.wait_open().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        switch.resume();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn open_gate_never_blocks() {
        let mut gate = PauseGate::open();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_open())
            .await
            .unwrap();
    }
}
