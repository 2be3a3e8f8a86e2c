//! File names inside a scenario run directory.

use std::path::{Path, PathBuf};

/// The serialized [crate::ScenarioRun] for the run directory.
pub const RUN_FILE: &str = "run.json";
/// Ledger of every scenario run, kept in the output root rather than the run directory.
pub const RUN_SUMMARY_LEDGER: &str = "run_summary.jsonl";
/// Human readable aggregate report.
pub const SUMMARY_FILE: &str = "summary.txt";
/// Machine readable aggregate report.
pub const SUMMARY_REPORT_FILE: &str = "summary_report.json";

/// Captured stdout and stderr of one workload invocation.
pub fn output_log_file(runner_id: usize, invocation: &str) -> String {
    format!("runner_{runner_id}_{invocation}_output.log")
}

/// The execution records for one runner, one JSON object per line.
pub fn execution_log_file(runner_id: usize) -> String {
    format!("runner_{runner_id}_metrics.log")
}

/// Time series file for a metric family.
pub fn metric_family_file(family: &str) -> String {
    format!("{family}.log")
}

/// Parse the runner id back out of an execution log file name.
pub fn runner_id_from_execution_log(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix("runner_")?
        .strip_suffix("_metrics.log")?
        .parse()
        .ok()
}

/// All execution log files present in a run directory, sorted by runner id.
pub fn find_execution_logs(run_dir: &Path) -> std::io::Result<Vec<(usize, PathBuf)>> {
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(run_dir)? {
        let path = entry?.path();
        if let Some(runner_id) = runner_id_from_execution_log(&path) {
            logs.push((runner_id, path));
        }
    }
    logs.sort_by_key(|(id, _)| *id);
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_run_layout() {
        assert_eq!(output_log_file(2, "5"), "runner_2_5_output.log");
        assert_eq!(output_log_file(1, "baseline"), "runner_1_baseline_output.log");
        assert_eq!(execution_log_file(12), "runner_12_metrics.log");
        assert_eq!(metric_family_file("cpu_cores"), "cpu_cores.log");
    }

    #[test]
    fn runner_id_is_recovered_from_execution_log_name() {
        assert_eq!(
            runner_id_from_execution_log(Path::new("/tmp/run/runner_7_metrics.log")),
            Some(7)
        );
        assert_eq!(
            runner_id_from_execution_log(Path::new("runner_7_1_output.log")),
            None
        );
        assert_eq!(runner_id_from_execution_log(Path::new("cpu.log")), None);
    }

    #[test]
    fn execution_logs_are_sorted_by_runner() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["runner_10_metrics.log", "runner_2_metrics.log", "cpu.log"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let ids = find_execution_logs(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 10]);
    }
}
