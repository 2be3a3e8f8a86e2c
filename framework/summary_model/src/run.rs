use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::jsonl::{append_jsonl, JsonlReader};
use crate::policy::TimingPolicy;

/// A single scenario run.
///
/// Created when the scenario starts and not modified afterwards, except for
/// [ScenarioRun::runner_end_count] which is set once the orchestrator has finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioRun {
    /// The unique run id
    ///
    /// Derived from the scenario name and start time unless overridden on the command line. The
    /// run directory is named after it.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The number of runners selected for the scenario
    pub runner_count: usize,
    /// The number of selected runners that were still registered when the scenario finished
    pub runner_end_count: usize,
    /// The timing policy and its parameters
    pub policy: TimingPolicy,
    /// The job description passed, unmodified, to every workload invocation
    pub job_description: PathBuf,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of.
    pub env: HashMap<String, String>,
    /// The version of Fleet Tunnel that was used for this run
    pub fleet_tunnel_version: String,
}

impl ScenarioRun {
    /// Create a new scenario run
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        runner_count: usize,
        policy: TimingPolicy,
        job_description: PathBuf,
        fleet_tunnel_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            runner_count,
            runner_end_count: 0,
            policy,
            job_description,
            env: HashMap::with_capacity(0),
            fleet_tunnel_version,
        }
    }

    /// Set the runner end count
    pub fn set_runner_end_count(&mut self, runner_end_count: usize) {
        self.runner_end_count = runner_end_count;
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run
    ///
    /// The fingerprint is intended to identify the configuration used to run the scenario, so
    /// that repeated runs of the same configuration can be compared. It uses the
    ///     - Scenario name
    ///     - Runner count
    ///     - Timing policy
    ///     - Job description path
    ///     - Selected environment variables
    ///     - Fleet Tunnel version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.runner_count.to_le_bytes());
        // Serializing a plain data enum cannot fail, but fall back to the debug form rather than panic.
        let policy = serde_json::to_string(&self.policy)
            .unwrap_or_else(|_| format!("{:?}", self.policy));
        Digest::update(&mut hasher, policy.as_bytes());
        Digest::update(
            &mut hasher,
            self.job_description.to_string_lossy().as_bytes(),
        );
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.fleet_tunnel_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Build a run id from the scenario name and a start time, e.g. `steady_baseline_20240102_150405`.
pub fn timestamped_run_id(scenario_name: &str, at: DateTime<Utc>) -> String {
    format!("{scenario_name}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Append the run to a ledger file
///
/// The run will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run: &ScenarioRun, path: &Path) -> anyhow::Result<()> {
    append_jsonl(run, path)?;
    Ok(())
}

/// Serialize the run to a writer
pub fn store_run_summary<W: Write>(run: &ScenarioRun, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(writer, run)?;
    Ok(())
}

/// Load a run from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<ScenarioRun> {
    let reader = std::io::BufReader::new(reader);
    let run: ScenarioRun = serde_json::from_reader(reader)?;
    Ok(run)
}

/// Load runs from a ledger file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<ScenarioRun>> {
    Ok(JsonlReader::default().parse_from_file(path)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::policy::{FixedDurationPolicy, WavePolicy};

    use super::*;

    fn sample_run() -> ScenarioRun {
        ScenarioRun::new(
            "steady_baseline_20240102_150405".to_string(),
            "steady_baseline".to_string(),
            1_704_207_845,
            3,
            TimingPolicy::FixedDuration(FixedDurationPolicy::new(10)),
            PathBuf::from("jobs/smoke.yaml"),
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn run_id_is_derived_from_time() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(
            timestamped_run_id("steady_baseline", at),
            "steady_baseline_20240102_150405"
        );
    }

    #[test]
    fn fingerprint_ignores_run_id_and_start_time() {
        let first = sample_run();
        let mut second = sample_run();
        second.run_id = "other".to_string();
        second.started_at += 600;
        second.set_runner_end_count(2);

        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_policy() {
        let first = sample_run();
        let mut second = sample_run();
        second.policy = TimingPolicy::Wave(WavePolicy::default());

        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn ledger_round_trips_multiple_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.jsonl");
        let mut second = sample_run();
        second.add_env("FT_FLEET_CONFIG".to_string(), "fleet.toml".to_string());

        append_run_summary(&sample_run(), &path).unwrap();
        append_run_summary(&second, &path).unwrap();

        let runs = load_summary_runs(&path).unwrap();
        pretty_assertions::assert_eq!(runs, vec![sample_run(), second]);
    }

    #[test]
    fn stored_run_loads_back() {
        let mut buf = Vec::new();
        store_run_summary(&sample_run(), &mut buf).unwrap();
        let loaded = load_run_summary(buf.as_slice()).unwrap();
        assert_eq!(loaded, sample_run());
    }
}
