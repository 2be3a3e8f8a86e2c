use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a scenario schedules workload executions across its selected runners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingPolicy {
    FixedDuration(FixedDurationPolicy),
    Outage(OutagePolicy),
    Wave(WavePolicy),
    NoisyNeighbor(NoisyNeighborPolicy),
}

impl TimingPolicy {
    /// The planned wall-clock duration, if the policy is time bounded.
    pub fn planned_duration(&self) -> Option<Duration> {
        match self {
            TimingPolicy::FixedDuration(p) => Some(p.duration()),
            TimingPolicy::Outage(p) => Some(p.repeat.duration()),
            TimingPolicy::Wave(_) | TimingPolicy::NoisyNeighbor(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimingPolicy::FixedDuration(_) => "fixed_duration",
            TimingPolicy::Outage(_) => "outage",
            TimingPolicy::Wave(_) => "wave",
            TimingPolicy::NoisyNeighbor(_) => "noisy_neighbor",
        }
    }
}

/// Each runner loops: execute, wait a random interval, execute again, until the deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixedDurationPolicy {
    pub duration_s: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Seed for the interval jitter. Random if not set.
    pub seed: Option<u64>,
}

impl FixedDurationPolicy {
    pub fn new(duration_s: u64) -> Self {
        Self {
            duration_s,
            min_interval_ms: 1_000,
            max_interval_ms: 5_000,
            seed: None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_s)
    }

    /// The interval bounds, ordered so that `min <= max` even if configured the wrong way round.
    pub fn interval_bounds(&self) -> (Duration, Duration) {
        let min = self.min_interval_ms.min(self.max_interval_ms);
        let max = self.min_interval_ms.max(self.max_interval_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }
}

/// A fixed duration repeat with every selected runner frozen for a while in the middle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutagePolicy {
    pub repeat: FixedDurationPolicy,
    /// How long the runners are active before the outage starts.
    pub outage_after_s: u64,
    /// How long the runners stay suspended.
    pub outage_duration_s: u64,
}

impl OutagePolicy {
    pub fn outage_after(&self) -> Duration {
        Duration::from_secs(self.outage_after_s)
    }

    pub fn outage_duration(&self) -> Duration {
        Duration::from_secs(self.outage_duration_s)
    }
}

/// Three randomly sized bursts of single executions launched with shrinking pauses between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WavePolicy {
    /// Target share of the selected runners for each wave, before jitter.
    pub proportions: [f64; 3],
    /// Each proportion is moved by a uniform amount in `[-jitter, jitter]`.
    pub jitter: f64,
    /// Pause after launching each wave. The last entry is the settle pause.
    pub pauses_ms: [u64; 3],
    /// Seed for the partition. Random if not set.
    pub seed: Option<u64>,
    /// Stop waiting for stragglers after this long and terminate them.
    pub straggler_timeout_s: Option<u64>,
}

impl Default for WavePolicy {
    fn default() -> Self {
        Self {
            proportions: [0.2, 0.3, 0.5],
            jitter: 0.1,
            pauses_ms: [1_000, 500, 200],
            seed: None,
            straggler_timeout_s: None,
        }
    }
}

impl WavePolicy {
    pub fn pauses(&self) -> [Duration; 3] {
        self.pauses_ms.map(Duration::from_millis)
    }

    pub fn straggler_timeout(&self) -> Option<Duration> {
        self.straggler_timeout_s.map(Duration::from_secs)
    }
}

/// Runner 1 runs alone to set a baseline, then the rest run together to measure contention.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NoisyNeighborPolicy {
    /// Whether runner 1 also joins the contended phase.
    pub include_baseline: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_serializes_with_kind_tag() {
        let policy = TimingPolicy::NoisyNeighbor(NoisyNeighborPolicy {
            include_baseline: true,
        });
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["kind"], "noisy_neighbor");
        assert_eq!(json["include_baseline"], true);

        let back: TimingPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn interval_bounds_are_ordered() {
        let mut policy = FixedDurationPolicy::new(10);
        policy.min_interval_ms = 900;
        policy.max_interval_ms = 100;
        assert_eq!(
            policy.interval_bounds(),
            (Duration::from_millis(100), Duration::from_millis(900))
        );
    }

    #[test]
    fn only_repeat_policies_have_planned_duration() {
        let fixed = TimingPolicy::FixedDuration(FixedDurationPolicy::new(30));
        assert_eq!(fixed.planned_duration(), Some(Duration::from_secs(30)));
        assert_eq!(TimingPolicy::Wave(WavePolicy::default()).planned_duration(), None);
    }
}
