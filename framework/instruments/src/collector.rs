//! Independent sampling loops, one per metric family, that run for the lifetime of a scenario.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_tunnel_core::prelude::ShutdownHandle;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};

use crate::family::MetricFamily;
use crate::sampler::{open_sampler, ProcSource, Sampler};
use crate::sink::CsvSink;

/// Samples host metrics into the run directory until stopped.
///
/// Every loop watches the same liveness handle. A family whose source is missing on this host
/// is skipped with a warning and does not affect the others.
pub struct MetricsCollector {
    liveness: ShutdownHandle,
    loops: Vec<(MetricFamily, JoinHandle<usize>)>,
}

impl MetricsCollector {
    /// Start sampling every family from the host's `/proc`.
    pub fn start(run_dir: &Path, period: Duration, liveness: ShutdownHandle) -> Self {
        Self::start_with(
            run_dir,
            period,
            liveness,
            &MetricFamily::ALL,
            ProcSource::default(),
        )
    }

    pub fn start_with(
        run_dir: &Path,
        period: Duration,
        liveness: ShutdownHandle,
        families: &[MetricFamily],
        source: ProcSource,
    ) -> Self {
        let mut loops = Vec::with_capacity(families.len());
        for family in families.iter().copied() {
            let sampler = match open_sampler(family, &source) {
                Ok(sampler) => sampler,
                Err(e) => {
                    log::warn!("Not collecting {family} metrics: {e:#}");
                    continue;
                }
            };

            let path = run_dir.join(family.file_name());
            let sink = match CsvSink::create(&path, &sampler.header()) {
                Ok(sink) => sink,
                Err(e) => {
                    log::warn!("Not collecting {family} metrics: {e:#}");
                    continue;
                }
            };

            let handle = tokio::spawn(sample_loop(family, sampler, sink, period, liveness.clone()));
            loops.push((family, handle));
        }

        log::info!(
            "Collecting {} metric families every {period:?}",
            loops.len()
        );
        Self { liveness, loops }
    }

    pub fn families(&self) -> Vec<MetricFamily> {
        self.loops.iter().map(|(family, _)| *family).collect()
    }

    /// Clear the liveness flag and wait up to `grace` for every loop to exit, aborting any
    /// that do not. Returns the number of rows written per family that exited cleanly.
    pub async fn stop(self, grace: Duration) -> BTreeMap<MetricFamily, usize> {
        self.liveness.shutdown();
        let deadline = Instant::now() + grace;

        let mut rows = BTreeMap::new();
        for (family, mut handle) in self.loops {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(count)) => {
                    log::debug!("Wrote {count} {family} samples");
                    rows.insert(family, count);
                }
                Ok(Err(e)) => log::warn!("The {family} sampling loop failed: {e}"),
                Err(_) => {
                    log::warn!("The {family} sampling loop did not stop in time, aborting it");
                    handle.abort();
                }
            }
        }
        rows
    }
}

async fn sample_loop(
    family: MetricFamily,
    mut sampler: Box<dyn Sampler>,
    mut sink: CsvSink,
    period: Duration,
    liveness: ShutdownHandle,
) -> usize {
    let mut listener = liveness.new_listener();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut written = 0;

    loop {
        tokio::select! {
            _ = listener.wait_for_shutdown() => break,
            _ = ticker.tick() => {}
        }

        match sampler.sample() {
            Ok(Some(row)) => {
                let now = chrono::Utc::now().timestamp_millis();
                match sink.write_row(now, &row) {
                    Ok(()) => written += 1,
                    Err(e) => log::warn!("Failed to write {family} sample: {e:#}"),
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Failed to sample {family}: {e:#}"),
        }
    }

    log::trace!("The {family} sampling loop stopped");
    written
}

/// Path of a family's time series inside a run directory.
pub fn family_path(run_dir: &Path, family: MetricFamily) -> PathBuf {
    run_dir.join(family.file_name())
}
