// src/scheduler.rs
use metrics::{counter, gauge};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::model::CompanyContext;
use crate::monitor::{CycleReport, MonitoringEngine};
use crate::registry::SourceRegistry;

#[derive(Clone, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    /// Registry is saved here after every cycle (last-checked timestamps).
    pub registry_path: Option<PathBuf>,
    /// Stop after this many cycles; `None` runs until the task is aborted.
    pub max_cycles: Option<u64>,
}

/// Spawn the periodic cycle runner. The first cycle starts immediately.
pub fn spawn_scheduler<F>(
    mut engine: MonitoringEngine,
    mut registry: SourceRegistry,
    context: CompanyContext,
    cfg: SchedulerCfg,
    mut on_report: F,
) -> JoinHandle<()>
where
    F: FnMut(&CycleReport) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs: u64 = 0;
        loop {
            ticker.tick().await;
            let report = engine.run_cycle(&mut registry, &context).await;

            if let Some(path) = &cfg.registry_path {
                if let Err(e) = registry.save(path) {
                    tracing::warn!(target: "monitor", error = ?e, path = %path.display(), "saving registry failed");
                }
            }

            counter!("scheduler_runs_total").increment(1);
            gauge!("scheduler_last_run_ts").set(report.finished_at.timestamp() as f64);
            tracing::info!(
                target: "monitor",
                findings = report.findings.len(),
                next_in_secs = cfg.interval.as_secs(),
                "scheduled cycle done"
            );
            on_report(&report);

            runs += 1;
            if cfg.max_cycles.is_some_and(|max| runs >= max) {
                break;
            }
        }
    })
}
