use std::sync::Arc;

use fleet_tunnel_summary_model::{ExecutionRecord, OutagePolicy};
use tokio::time::Instant;

use crate::context::ScenarioContext;
use crate::policy::fixed::repeat_on_all;
use crate::policy::PauseSwitch;

/// A fixed duration repeat with every selected runner frozen part way through.
///
/// The runner processes and the executions running on them are stopped as one batch and later
/// continued, so in-flight executions carry on where they were frozen and their recorded
/// duration includes the outage. No new executions start during the outage and the deadline is
/// not extended. Loops are joined after the resume.
pub async fn run_outage(ctx: Arc<ScenarioContext>, policy: &OutagePolicy) -> Vec<ExecutionRecord> {
    let deadline = Instant::now() + policy.repeat.duration();
    let (switch, gate) = PauseSwitch::new();

    let outage = async {
        let mut shutdown = ctx.shutdown_listener();
        tokio::select! {
            _ = tokio::time::sleep(policy.outage_after()) => {}
            _ = shutdown.wait_for_shutdown() => {
                log::info!("Scenario stopped before the outage started");
                return;
            }
        }

        let indices = ctx.runners().iter().map(|r| r.index).collect::<Vec<_>>();
        switch.pause();
        let stopped = {
            let mut pool = ctx.pool().lock().await;
            pool.suspend_runners(&indices, ctx.in_flight_processes(&indices))
        };
        log::info!(
            "Outage started, {stopped} process groups suspended for {}s",
            policy.outage_duration_s
        );

        tokio::select! {
            _ = tokio::time::sleep(policy.outage_duration()) => {}
            _ = shutdown.wait_for_shutdown() => log::info!("Scenario stopped, ending the outage early"),
        }

        let resumed = ctx.pool().lock().await.resume_all();
        switch.resume();
        log::info!("Outage over, {} process groups resumed", resumed.len());
    };

    let (records, ()) = tokio::join!(
        repeat_on_all(ctx.clone(), &policy.repeat, deadline, gate),
        outage
    );
    records
}
