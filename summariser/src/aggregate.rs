use fleet_tunnel_summary_model::ExecutionRecord;
use itertools::Itertools;

use crate::model::{FleetStats, RunnerStats};

/// Percentage slowdown of `duration_s` relative to `baseline_s`.
///
/// Returns `None` for a baseline that is not a positive duration.
pub fn slowdown_percent(duration_s: f64, baseline_s: f64) -> Option<f64> {
    if baseline_s > 0.0 && baseline_s.is_finite() {
        Some((duration_s / baseline_s - 1.0) * 100.0)
    } else {
        None
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.2}%")
}

/// The duration of the first baseline execution, if there was one.
pub fn recorded_baseline(records: &[ExecutionRecord]) -> Option<f64> {
    records
        .iter()
        .filter(|r| r.is_baseline())
        .min_by_key(|r| r.started_at_ms)
        .map(|r| r.duration_s)
}

/// Per runner statistics, ordered by runner id. Runners with only baseline executions are left out.
pub fn runner_stats(records: &[ExecutionRecord], baseline_s: Option<f64>) -> Vec<RunnerStats> {
    records
        .iter()
        .filter(|r| !r.is_baseline())
        .into_group_map_by(|r| r.runner_id)
        .into_iter()
        .sorted_by_key(|(runner_id, _)| *runner_id)
        .map(|(runner_id, records)| {
            let executions = records.len();
            let cumulative_s = records.iter().map(|r| r.duration_s).sum::<f64>();
            let average_s = cumulative_s / executions as f64;
            RunnerStats {
                runner_id,
                executions,
                failures: records.iter().filter(|r| !r.success).count(),
                cumulative_s,
                average_s,
                slowdown_percent: baseline_s.and_then(|b| slowdown_percent(average_s, b)),
            }
        })
        .collect()
}

/// Statistics across every non-baseline execution, `None` if there were none.
pub fn fleet_stats(records: &[ExecutionRecord], baseline_s: Option<f64>) -> Option<FleetStats> {
    let durations = records
        .iter()
        .filter(|r| !r.is_baseline())
        .map(|r| r.duration_s)
        .collect::<Vec<_>>();
    if durations.is_empty() {
        return None;
    }

    let mean_s = durations.iter().sum::<f64>() / durations.len() as f64;
    Some(FleetStats {
        executions: durations.len(),
        failures: records
            .iter()
            .filter(|r| !r.is_baseline() && !r.success)
            .count(),
        min_s: durations.iter().copied().fold(f64::INFINITY, f64::min),
        max_s: durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_s,
        slowdown_percent: baseline_s.and_then(|b| slowdown_percent(mean_s, b)),
    })
}
