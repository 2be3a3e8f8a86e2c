//! Parsers for the `/proc` files the sampling loops read.
//!
//! Everything here is pure so that the arithmetic can be checked against fixed input.

use std::collections::HashMap;

/// Cumulative CPU time counters from one `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    fn parse_fields(fields: &str) -> Option<Self> {
        let values = fields
            .split_whitespace()
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        if values.len() < 4 {
            return None;
        }
        let field = |i: usize| values.get(i).copied().unwrap_or(0);

        Some(Self {
            user: field(0),
            nice: field(1),
            system: field(2),
            idle: field(3),
            iowait: field(4),
            irq: field(5),
            softirq: field(6),
            steal: field(7),
        })
    }

    fn fields(&self) -> [u64; 8] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
    }

    pub fn total(&self) -> u64 {
        self.fields().iter().sum()
    }

    /// Time spent doing nothing, including waiting on IO.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Share of the interval since `previous` spent in each counter, in percent, in the order
    /// user, nice, system, idle, iowait, irq, softirq, steal.
    ///
    /// All zero when no time passed.
    pub fn percentages_since(&self, previous: &CpuTimes) -> [f64; 8] {
        let current = self.fields();
        let previous = previous.fields();
        let deltas: [u64; 8] = std::array::from_fn(|i| current[i].saturating_sub(previous[i]));
        let total_delta = deltas.iter().sum::<u64>();

        if total_delta == 0 {
            return [0.0; 8];
        }
        deltas.map(|delta| delta as f64 / total_delta as f64 * 100.0)
    }
}

/// Busy percentage of one core between two readings.
///
/// Returns exactly 0 when the counters did not move.
pub fn core_usage_percent(previous: &CpuTimes, current: &CpuTimes) -> f64 {
    let total_delta = current.total().saturating_sub(previous.total());
    if total_delta == 0 {
        return 0.0;
    }
    let idle_delta = current.idle_total().saturating_sub(previous.idle_total());
    (1.0 - idle_delta as f64 / total_delta as f64) * 100.0
}

/// The aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    stat.lines()
        .find_map(|line| line.strip_prefix("cpu "))
        .and_then(CpuTimes::parse_fields)
}

/// The per-core `cpuN` lines of `/proc/stat`, in file order.
pub fn parse_core_times(stat: &str) -> Vec<CpuTimes> {
    stat.lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("cpu")?;
            let (id, fields) = rest.split_once(char::is_whitespace)?;
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            CpuTimes::parse_fields(fields)
        })
        .collect()
}

/// `/proc/meminfo` values in kB, keyed by field name.
pub fn parse_meminfo(meminfo: &str) -> HashMap<String, u64> {
    meminfo
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Number of TCP sockets in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpStateCounts {
    pub established: u64,
    pub listen: u64,
    pub time_wait: u64,
    pub close_wait: u64,
    pub other: u64,
}

impl TcpStateCounts {
    /// Add the sockets listed in one `/proc/net/tcp` or `/proc/net/tcp6` table.
    pub fn add_table(&mut self, table: &str) {
        for line in table.lines().skip(1) {
            let Some(state) = line.split_whitespace().nth(3) else {
                continue;
            };
            match u8::from_str_radix(state, 16) {
                Ok(0x01) => self.established += 1,
                Ok(0x0A) => self.listen += 1,
                Ok(0x06) => self.time_wait += 1,
                Ok(0x08) => self.close_wait += 1,
                Ok(_) => self.other += 1,
                Err(_) => log::trace!("Skipping malformed socket line: {line}"),
            }
        }
    }
}
