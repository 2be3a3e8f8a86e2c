use std::path::Path;

use serde::Deserialize;

use crate::error::SummaryError;
use crate::model::ResourceStats;

#[derive(Debug, Deserialize)]
struct ResourceSample {
    cpu_percent: f64,
    memory_used_kb: u64,
}

/// Average and peak CPU and memory from a `resources.log` time series.
///
/// Rows that do not parse are skipped. Returns `None` when there are no usable rows.
pub fn load_resource_stats(path: &Path) -> Result<Option<ResourceStats>, SummaryError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| SummaryError::Resources {
        path: path.to_path_buf(),
        source,
    })?;

    let samples = reader
        .deserialize::<ResourceSample>()
        .filter_map(|row| match row {
            Ok(sample) => Some(sample),
            Err(e) => {
                log::debug!("Skipping resource sample in {}: {e}", path.display());
                None
            }
        })
        .collect::<Vec<_>>();
    if samples.is_empty() {
        return Ok(None);
    }

    let count = samples.len() as f64;
    Ok(Some(ResourceStats {
        samples: samples.len(),
        cpu_avg_percent: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / count,
        cpu_peak_percent: samples
            .iter()
            .map(|s| s.cpu_percent)
            .fold(0.0, f64::max),
        memory_avg_kb: samples.iter().map(|s| s.memory_used_kb as f64).sum::<f64>() / count,
        memory_peak_kb: samples.iter().map(|s| s.memory_used_kb).max().unwrap_or_default(),
    }))
}
