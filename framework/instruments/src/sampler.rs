use std::path::{Path, PathBuf};

use anyhow::Context;
use sysinfo::System;

use crate::family::MetricFamily;
use crate::procfs::{
    core_usage_percent, parse_core_times, parse_cpu_times, parse_meminfo, CpuTimes,
    TcpStateCounts,
};

/// Where the `/proc` based samplers read from.
#[derive(Debug, Clone)]
pub struct ProcSource {
    root: PathBuf,
}

impl Default for ProcSource {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, relative: &str) -> anyhow::Result<String> {
        let path = self.root.join(relative);
        std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read metric source {}", path.display()))
    }

    fn exists(&self, relative: &str) -> bool {
        Path::new(&self.root).join(relative).exists()
    }
}

/// Produces the rows of one metric family's time series.
pub trait Sampler: Send {
    /// Column names, excluding the leading timestamp.
    fn header(&self) -> Vec<String>;

    /// Take one sample. `None` means there is nothing to report for this tick.
    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>>;
}

/// Build the sampler for a family, failing if its source is not available on this host.
pub fn open_sampler(family: MetricFamily, source: &ProcSource) -> anyhow::Result<Box<dyn Sampler>> {
    Ok(match family {
        MetricFamily::Resources => Box::new(ResourceSampler::new()),
        MetricFamily::Cpu => Box::new(CpuSampler::open(source.clone())?),
        MetricFamily::CpuCores => Box::new(CoreSampler::open(source.clone())?),
        MetricFamily::Memory => Box::new(MemorySampler::open(source.clone())?),
        MetricFamily::Network => Box::new(NetworkSampler::open(source.clone())?),
    })
}

/// Host-wide snapshot through `sysinfo`, available on every platform it supports.
struct ResourceSampler {
    sys: System,
}

impl ResourceSampler {
    fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }
}

impl Sampler for ResourceSampler {
    fn header(&self) -> Vec<String> {
        to_strings(&[
            "cpu_percent",
            "memory_used_kb",
            "memory_total_kb",
            "load_average_1m",
        ])
    }

    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        let load = System::load_average();

        Ok(Some(vec![
            format!("{:.2}", self.sys.global_cpu_usage()),
            (self.sys.used_memory() / 1024).to_string(),
            (self.sys.total_memory() / 1024).to_string(),
            format!("{:.2}", load.one),
        ]))
    }
}

struct CpuSampler {
    source: ProcSource,
    previous: CpuTimes,
}

impl CpuSampler {
    fn open(source: ProcSource) -> anyhow::Result<Self> {
        let previous = parse_cpu_times(&source.read("stat")?)
            .context("No aggregate cpu line in stat")?;
        Ok(Self { source, previous })
    }
}

impl Sampler for CpuSampler {
    fn header(&self) -> Vec<String> {
        to_strings(&[
            "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
        ])
    }

    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        let current = parse_cpu_times(&self.source.read("stat")?)
            .context("No aggregate cpu line in stat")?;
        let shares = current.percentages_since(&self.previous);
        self.previous = current;
        Ok(Some(shares.iter().map(|s| format!("{s:.2}")).collect()))
    }
}

struct CoreSampler {
    source: ProcSource,
    previous: Vec<CpuTimes>,
}

impl CoreSampler {
    fn open(source: ProcSource) -> anyhow::Result<Self> {
        let previous = parse_core_times(&source.read("stat")?);
        anyhow::ensure!(!previous.is_empty(), "No per-core cpu lines in stat");
        Ok(Self { source, previous })
    }
}

impl Sampler for CoreSampler {
    fn header(&self) -> Vec<String> {
        (0..self.previous.len()).map(|i| format!("cpu{i}")).collect()
    }

    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        let current = parse_core_times(&self.source.read("stat")?);
        if current.len() != self.previous.len() {
            // A core went offline or came back, the columns no longer line up.
            log::debug!(
                "Core count changed from {} to {}, skipping sample",
                self.previous.len(),
                current.len()
            );
            return Ok(None);
        }

        let row = self
            .previous
            .iter()
            .zip(&current)
            .map(|(before, after)| format!("{:.2}", core_usage_percent(before, after)))
            .collect();
        self.previous = current;
        Ok(Some(row))
    }
}

const MEMINFO_FIELDS: [(&str, &str); 7] = [
    ("MemTotal", "mem_total_kb"),
    ("MemFree", "mem_free_kb"),
    ("MemAvailable", "mem_available_kb"),
    ("Buffers", "buffers_kb"),
    ("Cached", "cached_kb"),
    ("SwapTotal", "swap_total_kb"),
    ("SwapFree", "swap_free_kb"),
];

struct MemorySampler {
    source: ProcSource,
}

impl MemorySampler {
    fn open(source: ProcSource) -> anyhow::Result<Self> {
        source.read("meminfo")?;
        Ok(Self { source })
    }
}

impl Sampler for MemorySampler {
    fn header(&self) -> Vec<String> {
        MEMINFO_FIELDS
            .iter()
            .map(|(_, column)| column.to_string())
            .collect()
    }

    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        let info = parse_meminfo(&self.source.read("meminfo")?);
        Ok(Some(
            MEMINFO_FIELDS
                .iter()
                .map(|(key, _)| info.get(*key).copied().unwrap_or(0).to_string())
                .collect(),
        ))
    }
}

struct NetworkSampler {
    source: ProcSource,
    tables: Vec<&'static str>,
}

impl NetworkSampler {
    fn open(source: ProcSource) -> anyhow::Result<Self> {
        let tables = ["net/tcp", "net/tcp6"]
            .into_iter()
            .filter(|table| source.exists(table))
            .collect::<Vec<_>>();
        anyhow::ensure!(!tables.is_empty(), "No TCP socket tables found");
        Ok(Self { source, tables })
    }
}

impl Sampler for NetworkSampler {
    fn header(&self) -> Vec<String> {
        to_strings(&["established", "listen", "time_wait", "close_wait", "other"])
    }

    fn sample(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        let mut counts = TcpStateCounts::default();
        for table in &self.tables {
            counts.add_table(&self.source.read(table)?);
        }
        Ok(Some(
            [
                counts.established,
                counts.listen,
                counts.time_wait,
                counts.close_wait,
                counts.other,
            ]
            .iter()
            .map(u64::to_string)
            .collect(),
        ))
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
