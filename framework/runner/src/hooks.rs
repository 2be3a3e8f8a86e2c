//! Built in [PolicyHook](crate::definition::PolicyHook)s that build each timing policy from the
//! command line.

use anyhow::{anyhow, bail};
use fleet_tunnel_summary_model::{
    FixedDurationPolicy, NoisyNeighborPolicy, OutagePolicy, TimingPolicy, WavePolicy,
};

use crate::cli::FleetScenarioCli;
use crate::types::FleetTunnelResult;

/// Every runner loops until the deadline.
pub fn fixed_duration(cli: &FleetScenarioCli, duration_s: Option<u64>) -> FleetTunnelResult<TimingPolicy> {
    Ok(TimingPolicy::FixedDuration(repeat_policy(cli, duration_s)?))
}

/// A fixed duration repeat with an outage in the middle.
///
/// Without explicit flags the outage starts after a third of the duration and lasts for another
/// third.
pub fn outage(cli: &FleetScenarioCli, duration_s: Option<u64>) -> FleetTunnelResult<TimingPolicy> {
    let repeat = repeat_policy(cli, duration_s)?;
    let outage_after_s = cli.outage_after.unwrap_or(repeat.duration_s / 3);
    let outage_duration_s = cli.outage_duration.unwrap_or(repeat.duration_s / 3);

    if outage_after_s >= repeat.duration_s {
        bail!(
            "The outage would start after {outage_after_s}s, which is not within the {}s run",
            repeat.duration_s
        );
    }

    Ok(TimingPolicy::Outage(OutagePolicy {
        repeat,
        outage_after_s,
        outage_duration_s,
    }))
}

/// Three bursts of single executions.
pub fn wave(cli: &FleetScenarioCli, _duration_s: Option<u64>) -> FleetTunnelResult<TimingPolicy> {
    Ok(TimingPolicy::Wave(WavePolicy {
        seed: cli.seed,
        straggler_timeout_s: cli.straggler_timeout,
        ..Default::default()
    }))
}

/// A lone baseline on runner 1 followed by everybody else at once.
pub fn noisy_neighbor(
    cli: &FleetScenarioCli,
    _duration_s: Option<u64>,
) -> FleetTunnelResult<TimingPolicy> {
    if cli.runners < 2 && !cli.include_baseline {
        bail!("A noisy neighbor comparison needs at least two runners, or --include-baseline");
    }
    Ok(TimingPolicy::NoisyNeighbor(NoisyNeighborPolicy {
        include_baseline: cli.include_baseline,
    }))
}

fn repeat_policy(
    cli: &FleetScenarioCli,
    duration_s: Option<u64>,
) -> FleetTunnelResult<FixedDurationPolicy> {
    let duration_s = duration_s.ok_or_else(|| anyhow!("A duration is required, pass --duration"))?;
    if duration_s == 0 {
        bail!("The duration must be at least one second");
    }

    let mut policy = FixedDurationPolicy::new(duration_s);
    if let Some(min) = cli.min_interval {
        policy.min_interval_ms = min;
    }
    if let Some(max) = cli.max_interval {
        policy.max_interval_ms = max;
    }
    policy.seed = cli.seed;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cli() -> FleetScenarioCli {
        FleetScenarioCli::new(3, "job.yaml", "tok")
    }

    #[test]
    fn outage_defaults_to_middle_third() {
        let TimingPolicy::Outage(policy) = outage(&cli(), Some(90)).unwrap() else {
            panic!("expected an outage policy");
        };
        assert_eq!(policy.outage_after_s, 30);
        assert_eq!(policy.outage_duration_s, 30);
        assert_eq!(policy.repeat.duration_s, 90);
    }

    #[test]
    fn outage_must_start_within_run() {
        let mut cli = cli();
        cli.outage_after = Some(60);
        assert!(outage(&cli, Some(60)).is_err());
    }

    #[test]
    fn fixed_duration_needs_duration() {
        assert!(fixed_duration(&cli(), None).is_err());
        assert!(fixed_duration(&cli(), Some(0)).is_err());
    }

    #[test]
    fn interval_flags_override_defaults() {
        let mut cli = cli();
        cli.min_interval = Some(10);
        cli.max_interval = Some(20);
        cli.seed = Some(4);
        assert_eq!(
            fixed_duration(&cli, Some(5)).unwrap(),
            TimingPolicy::FixedDuration(FixedDurationPolicy {
                duration_s: 5,
                min_interval_ms: 10,
                max_interval_ms: 20,
                seed: Some(4),
            })
        );
    }

    #[test]
    fn noisy_neighbor_needs_a_neighbor() {
        let mut cli = cli();
        cli.runners = 1;
        assert!(noisy_neighbor(&cli, None).is_err());
        cli.include_baseline = true;
        assert!(noisy_neighbor(&cli, None).is_ok());
    }
}
