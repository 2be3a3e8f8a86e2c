use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(about, long_about = None)]
pub struct FleetScenarioCli {
    /// The number of runners to bring up and drive
    pub runners: usize,

    /// Path to the job description handed, unmodified, to each workload invocation
    pub job: PathBuf,

    /// Registration token for the controller
    #[arg(env = "FT_REGISTRATION_TOKEN", hide_env_values = true)]
    pub token: String,

    /// The number of seconds to run time bounded scenarios for
    #[arg(long)]
    pub duration: Option<u64>,

    /// Shortest pause between two invocations on the same runner, in milliseconds
    #[arg(long)]
    pub min_interval: Option<u64>,

    /// Longest pause between two invocations on the same runner, in milliseconds
    #[arg(long)]
    pub max_interval: Option<u64>,

    /// Seconds of normal activity before the outage starts
    #[arg(long)]
    pub outage_after: Option<u64>,

    /// Seconds that the runners stay suspended during the outage
    #[arg(long)]
    pub outage_duration: Option<u64>,

    /// Seed for every random choice the scenario makes, for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Let the baseline runner take part in the contended phase as well
    #[arg(long, default_value = "false")]
    pub include_baseline: bool,

    /// Give up on wave executions that are still running this many seconds after the last wave
    #[arg(long)]
    pub straggler_timeout: Option<u64>,

    /// Fleet configuration file, see `FT_FLEET_CONFIG`
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Name for the run directory, a timestamped name is generated if not set
    #[arg(long)]
    pub run_id: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[arg(long, default_value = "false")]
    pub no_progress: bool,

    /// Leave the runners registered and running when the scenario finishes
    #[arg(long, default_value = "false")]
    pub keep_runners: bool,
}

impl FleetScenarioCli {
    /// Arguments for a scenario with everything optional left unset.
    pub fn new(runners: usize, job: impl Into<PathBuf>, token: impl Into<String>) -> Self {
        Self {
            runners,
            job: job.into(),
            token: token.into(),
            duration: None,
            min_interval: None,
            max_interval: None,
            outage_after: None,
            outage_duration: None,
            seed: None,
            include_baseline: false,
            straggler_timeout: None,
            config: None,
            run_id: None,
            no_progress: true,
            keep_runners: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_and_flags() {
        let cli = FleetScenarioCli::try_parse_from([
            "steady_baseline",
            "3",
            "jobs/build.yaml",
            "tok",
            "--duration",
            "10",
            "--seed",
            "7",
            "--no-progress",
        ])
        .unwrap();

        assert_eq!(cli.runners, 3);
        assert_eq!(cli.job, PathBuf::from("jobs/build.yaml"));
        assert_eq!(cli.token, "tok");
        assert_eq!(cli.duration, Some(10));
        assert_eq!(cli.seed, Some(7));
        assert!(cli.no_progress);
        assert!(!cli.keep_runners);
    }

    #[test]
    fn runner_count_must_be_a_number() {
        assert!(FleetScenarioCli::try_parse_from(["s", "many", "job.yaml", "tok"]).is_err());
    }
}
