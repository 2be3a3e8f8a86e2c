use std::{fmt, str::FromStr};

use fleet_tunnel_summary_model::layout::metric_family_file;

/// A time series written by the metrics collector, one file per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricFamily {
    Resources,
    Cpu,
    CpuCores,
    Memory,
    Network,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 5] = [
        MetricFamily::Resources,
        MetricFamily::Cpu,
        MetricFamily::CpuCores,
        MetricFamily::Memory,
        MetricFamily::Network,
    ];

    /// Name of the time series file inside the run directory.
    pub fn file_name(&self) -> String {
        metric_family_file(&self.to_string())
    }
}

impl FromStr for MetricFamily {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resources" => Ok(MetricFamily::Resources),
            "cpu" => Ok(MetricFamily::Cpu),
            "cpu_cores" => Ok(MetricFamily::CpuCores),
            "memory" => Ok(MetricFamily::Memory),
            "network" => Ok(MetricFamily::Network),
            _ => Err("Unknown metric family"),
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricFamily::Resources => write!(f, "resources"),
            MetricFamily::Cpu => write!(f, "cpu"),
            MetricFamily::CpuCores => write!(f, "cpu_cores"),
            MetricFamily::Memory => write!(f, "memory"),
            MetricFamily::Network => write!(f, "network"),
        }
    }
}
