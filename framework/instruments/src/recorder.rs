use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use fleet_tunnel_summary_model::layout::execution_log_file;
use fleet_tunnel_summary_model::{append_jsonl, load_execution_records, ExecutionRecord, JsonlError};
use parking_lot::Mutex;

/// Appends [ExecutionRecord]s to the per-runner execution logs of a run directory.
#[derive(Debug)]
pub struct ExecutionRecorder {
    run_dir: PathBuf,
    write_lock: Mutex<()>,
    written: AtomicUsize,
}

impl ExecutionRecorder {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            write_lock: Mutex::new(()),
            written: AtomicUsize::new(0),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn log_path(&self, runner_id: usize) -> PathBuf {
        self.run_dir.join(execution_log_file(runner_id))
    }

    pub fn record(&self, record: &ExecutionRecord) -> Result<(), JsonlError> {
        let path = self.log_path(record.runner_id);
        {
            let _guard = self.write_lock.lock();
            append_jsonl(record, &path)?;
        }
        self.written.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Runner {} invocation {} took {:.3}s (exit {:?})",
            record.runner_id,
            record.invocation,
            record.duration_s,
            record.exit_code
        );
        Ok(())
    }

    /// Number of records written through this recorder.
    pub fn records_written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    pub fn load(&self, runner_id: usize) -> Result<Vec<ExecutionRecord>, JsonlError> {
        load_execution_records(&self.log_path(runner_id))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(runner_id: usize, invocation: &str) -> ExecutionRecord {
        ExecutionRecord {
            runner_id,
            invocation: invocation.to_string(),
            started_at_ms: 1_000,
            ended_at_ms: 3_500,
            duration_s: 2.5,
            exit_code: Some(0),
            success: true,
        }
    }

    #[test]
    fn records_land_in_per_runner_logs() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ExecutionRecorder::new(dir.path());
        recorder.record(&record(1, "1")).unwrap();
        recorder.record(&record(2, "1")).unwrap();
        recorder.record(&record(1, "2")).unwrap();

        assert_eq!(recorder.records_written(), 3);
        assert_eq!(recorder.load(1).unwrap(), vec![record(1, "1"), record(1, "2")]);
        assert!(dir.path().join("runner_2_metrics.log").exists());
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = std::sync::Arc::new(ExecutionRecorder::new(dir.path()));

        let handles = (0..8)
            .map(|i| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        recorder.record(&record(1, &format!("{i}-{n}"))).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recorder.load(1).unwrap().len(), 200);
    }
}
