use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use fleet_tunnel_core::prelude::DelegatedShutdownListener;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tokio::time::Instant;

use crate::context::ScenarioContext;

fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Shows how far a time-bounded policy has got and how many executions are running.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    policy: &'static str,
    ctx: Arc<ScenarioContext>,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let style = match ProgressStyle::with_template(
        "{spinner:.green} {prefix} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    ) {
        Ok(style) => style,
        Err(e) => {
            log::warn!("Not showing progress, invalid template: {e}");
            return;
        }
    };
    let planned = clock(planned_runtime);
    let style = style
        .with_key("planned_runtime", move |_: &ProgressState, w: &mut dyn Write| {
            let _ = w.write_str(&planned);
        })
        .progress_chars("#>-");

    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);
            pb.set_prefix(policy);

            while !shutdown_listener.should_shutdown() {
                pb.set_position(min(start_time.elapsed().as_secs(), planned_runtime.as_secs()));
                pb.set_message(format!("{} of {} runners busy", ctx.in_flight_count(), ctx.runners().len()));
                std::thread::sleep(Duration::from_secs(1));
            }

            log::trace!("Progress thread shutting down");
            pb.finish_and_clear();
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats_hours_minutes_seconds() {
        assert_eq!(clock(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(clock(Duration::from_secs(59)), "00:00:59");
    }
}
