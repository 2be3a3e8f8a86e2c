//! Reduces the execution records and metric samples in a scenario run directory to a summary.
//!
//! Everything here only reads the run directory, apart from [summarise_run] which also writes the
//! two summary files. Running it again over the same directory gives the same output.

use std::fs::File;
use std::path::Path;

use fleet_tunnel_summary_model::layout::{
    find_execution_logs, metric_family_file, RUN_FILE, SUMMARY_FILE, SUMMARY_REPORT_FILE,
};
use fleet_tunnel_summary_model::{load_execution_records, load_run_summary};

mod aggregate;
mod error;
pub mod model;
mod report;
mod resources;

pub use aggregate::{
    fleet_stats, format_percent, recorded_baseline, runner_stats, slowdown_percent,
};
pub use error::SummaryError;
pub use report::render_text;
pub use resources::load_resource_stats;

use crate::model::RunReport;

/// Aggregate a run directory without writing anything.
///
/// The baseline is `baseline_s` if given, otherwise the recorded baseline execution. Execution
/// logs and metric files that cannot be read are left out with a warning.
pub fn aggregate_run(run_dir: &Path, baseline_s: Option<f64>) -> Result<RunReport, SummaryError> {
    if !run_dir.is_dir() {
        return Err(SummaryError::MissingRunDirectory(run_dir.to_path_buf()));
    }

    let run_id = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| run_dir.display().to_string());

    let scenario_name = match File::open(run_dir.join(RUN_FILE)) {
        Ok(file) => match load_run_summary(file) {
            Ok(run) => Some(run.scenario_name),
            Err(e) => {
                log::warn!("Ignoring unreadable {RUN_FILE}: {e:?}");
                None
            }
        },
        Err(_) => None,
    };

    let mut records = Vec::new();
    let logs = find_execution_logs(run_dir).map_err(|e| SummaryError::io(run_dir, e))?;
    for (runner_id, path) in logs {
        match load_execution_records(&path) {
            Ok(mut runner_records) => records.append(&mut runner_records),
            Err(source) => log::warn!(
                "{}",
                SummaryError::Records {
                    path: path.clone(),
                    source
                }
            ),
        }
        log::debug!("Loaded execution records for runner {runner_id}");
    }
    if records.is_empty() {
        log::warn!("No execution records in {}", run_dir.display());
    }

    let baseline_s = baseline_s.or_else(|| recorded_baseline(&records));

    let resources_path = run_dir.join(metric_family_file("resources"));
    let resources = if resources_path.exists() {
        match load_resource_stats(&resources_path) {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    } else {
        log::warn!("No resource samples at {}", resources_path.display());
        None
    };

    Ok(RunReport {
        run_id,
        scenario_name,
        baseline_s,
        runners: runner_stats(&records, baseline_s),
        fleet: fleet_stats(&records, baseline_s),
        resources,
    })
}

/// Aggregate a run directory and write the text and JSON summaries into it.
pub fn summarise_run(run_dir: &Path, baseline_s: Option<f64>) -> Result<RunReport, SummaryError> {
    let report = aggregate_run(run_dir, baseline_s)?;

    let text_path = run_dir.join(SUMMARY_FILE);
    std::fs::write(&text_path, render_text(&report)).map_err(|e| SummaryError::io(&text_path, e))?;

    let json_path = run_dir.join(SUMMARY_REPORT_FILE);
    let file = File::create(&json_path).map_err(|e| SummaryError::io(&json_path, e))?;
    serde_json::to_writer_pretty(file, &report)?;

    log::info!("Wrote summary to {}", text_path.display());
    Ok(report)
}
