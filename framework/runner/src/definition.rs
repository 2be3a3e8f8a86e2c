use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use fleet_tunnel_pool::prelude::FleetConfig;
use fleet_tunnel_summary_model::TimingPolicy;

use crate::cli::FleetScenarioCli;
use crate::init::init;
use crate::types::FleetTunnelResult;

/// Turns the command line, and the duration resolved from it, into the scenario's timing policy.
///
/// The duration is the `--duration` flag, or the scenario default if the flag was not given.
pub type PolicyHook = fn(&FleetScenarioCli, Option<u64>) -> FleetTunnelResult<TimingPolicy>;

/// The builder for a scenario definition.
///
/// This must be used in the `main` of a scenario binary to define the scenario that you want to
/// run.
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, which should be unique within the workspace.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    cli: FleetScenarioCli,
    /// Used for time bounded policies when no `--duration` is given.
    default_duration_s: Option<u64>,
    policy_fn: Option<PolicyHook>,
}

pub struct ScenarioDefinition {
    pub name: String,
    pub cli: FleetScenarioCli,
    pub policy: TimingPolicy,
    pub config: Arc<FleetConfig>,
}

impl ScenarioDefinitionBuilder {
    /// Initialise logging, parse the command line and start a new scenario definition.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    /// Start a new scenario definition from already parsed arguments.
    pub fn new(name: &str, cli: FleetScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_duration_s: None,
            policy_fn: None,
        }
    }

    pub fn with_default_duration_s(mut self, duration_s: u64) -> Self {
        self.default_duration_s = Some(duration_s);
        self
    }

    /// Set how executions are scheduled, see [crate::hooks] for the built in policies.
    pub fn use_policy(mut self, policy_fn: PolicyHook) -> Self {
        self.policy_fn = Some(policy_fn);
        self
    }

    pub(crate) fn build(self) -> FleetTunnelResult<ScenarioDefinition> {
        if self.cli.runners == 0 {
            bail!("At least one runner is required");
        }
        if !self.cli.job.is_file() {
            bail!(
                "Job description '{}' does not exist",
                self.cli.job.display()
            );
        }

        let policy_fn = self
            .policy_fn
            .ok_or_else(|| anyhow!("No timing policy set for scenario '{}'", self.name))?;
        let duration_s = self.cli.duration.or(self.default_duration_s);
        let policy = policy_fn(&self.cli, duration_s)?;

        let config = FleetConfig::load(self.cli.config.as_deref())
            .context("Failed to load fleet configuration")?;
        config
            .check_prerequisites()
            .context("Missing prerequisite tooling")?;
        if self.cli.runners > config.capacity() {
            bail!(
                "Requested {} runners but the fleet can hold at most {}",
                self.cli.runners,
                config.capacity()
            );
        }

        Ok(ScenarioDefinition {
            name: self.name,
            cli: self.cli,
            policy,
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks;

    fn job_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn default_duration_applies_without_flag() {
        let job = job_file();
        let definition = ScenarioDefinitionBuilder::new(
            "steady",
            FleetScenarioCli::new(2, job.path(), "tok"),
        )
        .with_default_duration_s(30)
        .use_policy(hooks::fixed_duration)
        .build()
        .unwrap();

        assert_eq!(
            definition.policy.planned_duration(),
            Some(std::time::Duration::from_secs(30))
        );
    }

    #[test]
    fn missing_job_is_rejected() {
        let result = ScenarioDefinitionBuilder::new(
            "steady",
            FleetScenarioCli::new(2, "/definitely/not/a/job.yaml", "tok"),
        )
        .with_default_duration_s(30)
        .use_policy(hooks::fixed_duration)
        .build();

        let err = result.err().unwrap();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn zero_runners_is_rejected() {
        let job = job_file();
        let result = ScenarioDefinitionBuilder::new("s", FleetScenarioCli::new(0, job.path(), "t"))
            .use_policy(hooks::wave)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn policy_is_required() {
        let job = job_file();
        let result =
            ScenarioDefinitionBuilder::new("s", FleetScenarioCli::new(1, job.path(), "t")).build();
        assert!(result.is_err());
    }
}
