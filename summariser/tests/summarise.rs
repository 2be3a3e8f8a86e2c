use std::path::Path;

use fleet_summariser::{aggregate_run, summarise_run, SummaryError};
use fleet_tunnel_summary_model::layout::{execution_log_file, SUMMARY_FILE, SUMMARY_REPORT_FILE};
use fleet_tunnel_summary_model::{append_jsonl, ExecutionRecord, BASELINE_INVOCATION};
use pretty_assertions::assert_eq;

fn write_record(run_dir: &Path, runner_id: usize, invocation: &str, duration_s: f64) {
    let record = ExecutionRecord {
        runner_id,
        invocation: invocation.to_string(),
        started_at_ms: 1_700_000_000_000 + runner_id as i64,
        ended_at_ms: 1_700_000_000_000 + runner_id as i64 + (duration_s * 1000.0) as i64,
        duration_s,
        exit_code: Some(0),
        success: true,
    };
    append_jsonl(&record, run_dir.join(execution_log_file(runner_id))).unwrap();
}

fn noisy_run(run_dir: &Path) {
    write_record(run_dir, 1, BASELINE_INVOCATION, 10.0);
    write_record(run_dir, 2, "contended", 12.5);
    write_record(run_dir, 3, "contended", 10.0);
    std::fs::write(
        run_dir.join("resources.log"),
        "timestamp_ms,cpu_percent,memory_used_kb,memory_total_kb,load_average_1m\n\
         1000,50.00,1000,4000,1.00\n\
         2000,70.00,3000,4000,1.20\n",
    )
    .unwrap();
}

#[test]
fn slowdown_is_relative_to_recorded_baseline() {
    let dir = tempfile::tempdir().unwrap();
    noisy_run(dir.path());

    let report = summarise_run(dir.path(), None).unwrap();
    assert_eq!(report.baseline_s, Some(10.0));
    let slowdowns = report
        .runners
        .iter()
        .map(|r| (r.runner_id, r.slowdown_percent.map(fleet_summariser::format_percent)))
        .collect::<Vec<_>>();
    assert_eq!(
        slowdowns,
        vec![(2, Some("25.00%".to_string())), (3, Some("0.00%".to_string()))]
    );

    let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
    assert!(text.contains("Average Runtime: 11.250s"), "{text}");
    assert!(text.contains("Baseline Runtime: 10.000s"), "{text}");
    assert!(text.contains("25.00%"), "{text}");
    assert!(text.contains("Resources over 2 samples"), "{text}");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(SUMMARY_REPORT_FILE)).unwrap())
            .unwrap();
    assert_eq!(json["baseline_s"], serde_json::json!(10.0));
    assert_eq!(json["resources"]["cpu_peak_percent"], serde_json::json!(70.0));
}

#[test]
fn baseline_can_be_overridden() {
    let dir = tempfile::tempdir().unwrap();
    noisy_run(dir.path());

    let report = aggregate_run(dir.path(), Some(12.5)).unwrap();
    let fleet = report.fleet.unwrap();
    assert_eq!(fleet.slowdown_percent.map(fleet_summariser::format_percent), Some("-10.00%".to_string()));
}

#[test]
fn summarising_twice_gives_the_same_output() {
    let dir = tempfile::tempdir().unwrap();
    noisy_run(dir.path());

    summarise_run(dir.path(), None).unwrap();
    let first_text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
    let first_json = std::fs::read_to_string(dir.path().join(SUMMARY_REPORT_FILE)).unwrap();

    summarise_run(dir.path(), None).unwrap();
    assert_eq!(first_text, std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap());
    assert_eq!(first_json, std::fs::read_to_string(dir.path().join(SUMMARY_REPORT_FILE)).unwrap());
}

#[test]
fn missing_metric_files_are_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_record(dir.path(), 1, "1", 2.0);
    write_record(dir.path(), 1, "2", 4.0);
    std::fs::write(dir.path().join(execution_log_file(2)), "{not json\n").unwrap();

    let report = summarise_run(dir.path(), None).unwrap();
    assert_eq!(report.resources, None);
    assert_eq!(report.baseline_s, None);
    assert_eq!(report.runners.len(), 1);
    assert_eq!(report.runners[0].average_s, 3.0);

    let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
    assert!(text.contains("Average Runtime: 3.000s"), "{text}");
}

#[test]
fn empty_run_still_summarises() {
    let dir = tempfile::tempdir().unwrap();
    let report = summarise_run(dir.path(), None).unwrap();
    assert_eq!(report.fleet, None);
    let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
    assert!(text.contains("Average Runtime: no executions"));
}

#[test]
fn missing_run_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = aggregate_run(&dir.path().join("nope"), None);
    assert!(matches!(result, Err(SummaryError::MissingRunDirectory(_))));
}
