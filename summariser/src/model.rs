use serde::{Deserialize, Serialize};

/// Execution statistics for one runner. Baseline executions are not included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerStats {
    pub runner_id: usize,
    pub executions: usize,
    pub failures: usize,
    pub cumulative_s: f64,
    pub average_s: f64,
    /// Slowdown of the average relative to the baseline, if there is one.
    pub slowdown_percent: Option<f64>,
}

/// Statistics over every non-baseline execution in the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetStats {
    pub executions: usize,
    pub failures: usize,
    pub min_s: f64,
    pub max_s: f64,
    pub mean_s: f64,
    /// Slowdown of the mean relative to the baseline, if there is one.
    pub slowdown_percent: Option<f64>,
}

/// Average and peak host usage over the scenario window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceStats {
    pub samples: usize,
    pub cpu_avg_percent: f64,
    pub cpu_peak_percent: f64,
    pub memory_avg_kb: f64,
    pub memory_peak_kb: u64,
}

/// Everything the summariser knows about a run directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub scenario_name: Option<String>,
    pub baseline_s: Option<f64>,
    pub runners: Vec<RunnerStats>,
    pub fleet: Option<FleetStats>,
    pub resources: Option<ResourceStats>,
}
