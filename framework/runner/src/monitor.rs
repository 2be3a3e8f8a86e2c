use std::sync::Arc;

use fleet_tunnel_core::prelude::DelegatedShutdownListener;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::context::ScenarioContext;

/// Share of the whole host, in percent, for a per-process CPU reading that sysinfo reports
/// relative to a single core.
fn host_share(process_cpu: f32, cpu_count: usize) -> f32 {
    process_cpu / cpu_count.max(1) as f32
}

/// Tracks controller overhead over a run. Warns once each time usage crosses the limit rather
/// than on every sample.
#[derive(Debug)]
struct OverheadAlarm {
    limit: f32,
    raised: bool,
    peak: f32,
    peak_in_flight: usize,
}

impl OverheadAlarm {
    fn new(limit: f32) -> Self {
        Self {
            limit,
            raised: false,
            peak: 0.0,
            peak_in_flight: 0,
        }
    }

    /// Returns true when this sample should be reported.
    fn observe(&mut self, usage: f32, in_flight: usize) -> bool {
        if usage > self.peak {
            self.peak = usage;
            self.peak_in_flight = in_flight;
        }

        let over = usage > self.limit;
        let report = over && !self.raised;
        self.raised = over;
        report
    }
}

/// Watch the controller's own CPU usage while the fleet is driven.
///
/// This won't stop the scenario. It logs a warning when the controller takes more than
/// `limit_percent` of the host, since the host metrics then include a noticeable share of
/// orchestration overhead, and logs the peak when the scenario ends.
pub(crate) fn start_monitor(
    ctx: Arc<ScenarioContext>,
    limit_percent: f32,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let spawned = std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let controller = Pid::from_u32(std::process::id());
            let mut sys = System::new();
            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);
            let mut alarm = OverheadAlarm::new(limit_percent);

            while !shutdown_listener.should_shutdown() {
                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[controller]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );
                let Some(process) = sys.process(controller) else {
                    log::debug!("No process info for the controller, stopping the monitor");
                    break;
                };

                let usage = host_share(process.cpu_usage(), cpu_count);
                let in_flight = ctx.in_flight_count();
                if alarm.observe(usage, in_flight) {
                    log::warn!(
                        "Controller is using {usage:.2}% of {cpu_count} cores while driving {in_flight} executions, host metrics include its overhead"
                    );
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }

            log::debug!(
                "Controller CPU peaked at {:.2}% with {} executions in flight",
                alarm.peak,
                alarm.peak_in_flight
            );
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start monitor thread: {e}");
    }
}
