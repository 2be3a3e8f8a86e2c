use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::jsonl::{JsonlError, JsonlReader};

/// Invocation label used for the single baseline execution of a noisy-neighbor scenario.
pub const BASELINE_INVOCATION: &str = "baseline";

/// The outcome of one workload invocation on one runner.
///
/// Written once when the invocation completes and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub runner_id: usize,
    /// Invocation index within a repeat loop, or a label such as `wave2` or `baseline`.
    pub invocation: String,
    /// Unix timestamp in milliseconds.
    pub started_at_ms: i64,
    /// Unix timestamp in milliseconds.
    pub ended_at_ms: i64,
    /// Wall-clock duration in seconds, measured with a monotonic clock.
    pub duration_s: f64,
    /// Exit code of the workload, if it exited normally.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ExecutionRecord {
    pub fn is_baseline(&self) -> bool {
        self.invocation == BASELINE_INVOCATION
    }
}

/// Load every record from a runner's execution log.
///
/// Lines that cannot be parsed are skipped, a partially written line should not hide the rest of
/// the run.
pub fn load_execution_records(path: &Path) -> Result<Vec<ExecutionRecord>, JsonlError> {
    JsonlReader {
        allow_invalid_entries: true,
    }
    .parse_from_file(path)
}

#[cfg(test)]
mod tests {
    use crate::append_jsonl;

    use super::*;

    fn record(invocation: &str, duration_s: f64) -> ExecutionRecord {
        ExecutionRecord {
            runner_id: 1,
            invocation: invocation.to_string(),
            started_at_ms: 1_700_000_000_000,
            ended_at_ms: 1_700_000_000_000 + (duration_s * 1000.0) as i64,
            duration_s,
            exit_code: Some(0),
            success: true,
        }
    }

    #[test]
    fn baseline_is_recognised_by_label() {
        assert!(record(BASELINE_INVOCATION, 1.0).is_baseline());
        assert!(!record("1", 1.0).is_baseline());
    }

    #[test]
    fn load_skips_truncated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner_1_metrics.log");
        append_jsonl(&record("1", 1.5), &path).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"{\"runner_id\":1,\n"))
            .unwrap();
        append_jsonl(&record("2", 2.5), &path).unwrap();

        let records = load_execution_records(&path).unwrap();
        pretty_assertions::assert_eq!(records, vec![record("1", 1.5), record("2", 2.5)]);
    }
}
