use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleet_tunnel_core::prelude::ShutdownHandle;
use fleet_tunnel_instruments::MetricsCollector;
use fleet_tunnel_pool::prelude::RunnerPool;
use fleet_tunnel_summary_model::layout::{RUN_FILE, RUN_SUMMARY_LEDGER};
use fleet_tunnel_summary_model::{
    append_run_summary, store_run_summary, timestamped_run_id, ScenarioRun,
};

use crate::context::ScenarioContext;
use crate::definition::{ScenarioDefinition, ScenarioDefinitionBuilder};
use crate::monitor::start_monitor;
use crate::policy;
use crate::progress::start_progress;
use crate::shutdown::start_shutdown_listener;

/// Run a scenario from start to finish.
///
/// Brings the pool up to the requested size, samples host metrics while the timing policy drives
/// the workload, writes the summary into the run directory and tears the pool down again.
pub fn run(definition: ScenarioDefinitionBuilder) -> anyhow::Result<()> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);

    runtime.block_on(run_scenario(definition, shutdown_handle))
}

async fn run_scenario(
    definition: ScenarioDefinition,
    shutdown_handle: ShutdownHandle,
) -> anyhow::Result<()> {
    let cli = &definition.cli;
    let config = definition.config.clone();

    let started_at = chrono::Utc::now();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| timestamped_run_id(&definition.name, started_at));
    let run_dir = config.paths.output_dir.join(&run_id);
    std::fs::create_dir_all(&config.paths.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.paths.output_dir.display()
        )
    })?;
    std::fs::create_dir(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
    log::info!("Writing results to {}", run_dir.display());

    let job = cli
        .job
        .canonicalize()
        .with_context(|| format!("Failed to resolve job description {}", cli.job.display()))?;

    let mut pool = RunnerPool::open(config.clone()).context("Failed to open the runner pool")?;
    let report = pool
        .ensure(cli.runners, &cli.token)
        .await
        .with_context(|| format!("Failed to bring the pool up to {} runners", cli.runners))?;
    log::info!(
        "Pool ready with {} new and {} existing runners",
        report.created.len(),
        report.kept
    );

    let runners = pool.views(cli.runners);
    if runners.len() < cli.runners {
        log::warn!(
            "Only {} of the requested {} runners are active",
            runners.len(),
            cli.runners
        );
    }
    let selected = runners.iter().map(|r| r.index).collect::<Vec<_>>();
    let pool = Arc::new(tokio::sync::Mutex::new(pool));

    let mut scenario_run = ScenarioRun::new(
        run_id,
        definition.name.clone(),
        started_at.timestamp(),
        runners.len(),
        definition.policy.clone(),
        job.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    for (key, value) in &config.runtime.env {
        scenario_run.add_env(key.clone(), value.clone());
    }
    write_run_file(&scenario_run, &run_dir)?;

    let liveness = ShutdownHandle::new();
    let collector = MetricsCollector::start(
        &run_dir,
        Duration::from_millis(config.metrics.sample_period_ms),
        liveness,
    );

    let ctx = Arc::new(ScenarioContext::new(
        run_dir.clone(),
        job,
        &config.runtime,
        runners,
        pool.clone(),
        shutdown_handle,
    ));

    // Stops the progress bar and the monitor once the policy is done.
    let session = ShutdownHandle::new();
    if let Some(planned_runtime) = definition.policy.planned_duration() {
        if !cli.no_progress {
            start_progress(
                planned_runtime,
                definition.policy.name(),
                ctx.clone(),
                session.new_listener(),
            );
        }
    }
    start_monitor(
        ctx.clone(),
        config.metrics.controller_cpu_warn_percent,
        session.new_listener(),
    );

    let records = policy::drive(ctx.clone(), &definition.policy).await;
    session.shutdown();
    log::info!(
        "Scenario finished with {} executions, {} of which failed",
        records.len(),
        records.iter().filter(|r| !r.success).count()
    );

    let samples = collector
        .stop(Duration::from_millis(config.metrics.stop_grace_ms))
        .await;
    for (family, rows) in samples {
        log::debug!("Collected {rows} {family} samples");
    }

    match fleet_summariser::summarise_run(&run_dir, None) {
        Ok(summary) => println!("{}", fleet_summariser::render_text(&summary)),
        Err(e) => log::error!("Failed to summarise run {}: {e}", run_dir.display()),
    }

    let mut pool = pool.lock().await;
    let still_active = selected
        .iter()
        .filter(|index| pool.get(**index).is_some_and(|r| r.state().is_active()))
        .count();
    scenario_run.set_runner_end_count(still_active);
    write_run_file(&scenario_run, &run_dir)?;
    append_run_summary(
        &scenario_run,
        &config.paths.output_dir.join(RUN_SUMMARY_LEDGER),
    )?;

    if cli.keep_runners {
        log::info!("Leaving {} runners in place", pool.len());
    } else {
        let removed = pool.teardown_all().await;
        log::info!("Tore down {removed} runners");
    }

    Ok(())
}

fn write_run_file(run: &ScenarioRun, run_dir: &Path) -> anyhow::Result<()> {
    let path = run_dir.join(RUN_FILE);
    let mut file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    store_run_summary(run, &mut file)
}
