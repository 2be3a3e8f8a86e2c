use std::fmt::Write;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::aggregate::format_percent;
use crate::model::RunReport;

#[derive(Tabled)]
struct RunnerRow {
    #[tabled(rename = "Runner")]
    runner_id: usize,
    #[tabled(rename = "Executions")]
    executions: usize,
    #[tabled(rename = "Failed")]
    failures: usize,
    #[tabled(rename = "Cumulative (s)")]
    cumulative: String,
    #[tabled(rename = "Average (s)")]
    average: String,
    #[tabled(rename = "Slowdown")]
    slowdown: String,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: &'static str,
    #[tabled(rename = "Average")]
    average: String,
    #[tabled(rename = "Peak")]
    peak: String,
}

fn seconds(value: f64) -> String {
    format!("{value:.3}s")
}

/// The human readable summary of a run.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run: {}", report.run_id);
    if let Some(name) = &report.scenario_name {
        let _ = writeln!(out, "Scenario: {name}");
    }

    match &report.fleet {
        Some(fleet) => {
            let _ = writeln!(
                out,
                "Executions: {} ({} failed)",
                fleet.executions, fleet.failures
            );
            let _ = writeln!(out, "Average Runtime: {}", seconds(fleet.mean_s));
            let _ = writeln!(out, "Fastest Runtime: {}", seconds(fleet.min_s));
            let _ = writeln!(out, "Slowest Runtime: {}", seconds(fleet.max_s));
        }
        None => {
            let _ = writeln!(out, "Executions: 0");
            let _ = writeln!(out, "Average Runtime: no executions");
        }
    }

    if let Some(baseline) = report.baseline_s {
        let _ = writeln!(out, "Baseline Runtime: {}", seconds(baseline));
    }
    if let Some(slowdown) = report.fleet.as_ref().and_then(|f| f.slowdown_percent) {
        let _ = writeln!(out, "Slowdown: {}", format_percent(slowdown));
    }

    if !report.runners.is_empty() {
        let rows = report
            .runners
            .iter()
            .map(|r| RunnerRow {
                runner_id: r.runner_id,
                executions: r.executions,
                failures: r.failures,
                cumulative: format!("{:.3}", r.cumulative_s),
                average: format!("{:.3}", r.average_s),
                slowdown: r.slowdown_percent.map(format_percent).unwrap_or_else(|| "-".to_string()),
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(&rows);
        table.with(Style::modern());
        let _ = writeln!(out, "\nPer runner\n{table}");
    }

    if let Some(resources) = &report.resources {
        let rows = [
            ResourceRow {
                resource: "CPU",
                average: format_percent(resources.cpu_avg_percent),
                peak: format_percent(resources.cpu_peak_percent),
            },
            ResourceRow {
                resource: "Memory",
                average: format!("{:.0} KB", resources.memory_avg_kb),
                peak: format!("{} KB", resources.memory_peak_kb),
            },
        ];
        let mut table = Table::new(&rows);
        table.with(Style::modern());
        let _ = writeln!(
            out,
            "\nResources over {} samples\n{table}",
            resources.samples
        );
    }

    out
}
