//! Monitoring engine: per-source extraction -> filtering -> analysis -> trend recording.
//!
//! Sources are processed one at a time with a minimum delay between them. A
//! failure for one source becomes a `Failed` outcome and never stops the cycle.
//! State write failures are logged and counted; the finding is still reported.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::analyze::AnalysisEngine;
use crate::config::MonitorConfig;
use crate::extract::{Extractor, Strategy};
use crate::fingerprint::FingerprintStore;
use crate::model::{CompanyContext, Finding, Source};
use crate::registry::{RegistryError, SourceRegistry};
use crate::store::StateStore;
use crate::trend::{Comparison, Trend, TrendAccumulator, TrendError};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "monitor_sources_checked_total",
            "Sources processed, by terminal status."
        );
        describe_counter!("monitor_findings_total", "Findings produced.");
        describe_counter!(
            "monitor_persist_errors_total",
            "State writes that failed, by kind. The cycle carries on in memory."
        );
        describe_gauge!(
            "monitor_last_cycle_ts",
            "Unix timestamp of the last completed cycle."
        );
        describe_histogram!("monitor_cycle_ms", "Wall time of one cycle in milliseconds.");
    });
}

/// Stage in which a source failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extracting,
    Analyzing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Extracting => "extracting",
            Phase::Analyzing => "analyzing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// Every strategy ran and found nothing.
    NoContent,
    /// Content found, all of it already reported.
    NoUnseen,
}

/// Terminal state of one source in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SourceStatus {
    Reported { new_updates: usize },
    Empty { reason: EmptyReason },
    Failed { phase: Phase, error: String },
}

impl SourceStatus {
    fn label(&self) -> &'static str {
        match self {
            SourceStatus::Reported { .. } => "reported",
            SourceStatus::Empty { .. } => "empty",
            SourceStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    #[serde(flatten)]
    pub status: SourceStatus,
    /// Strategy that produced the candidates, if any did.
    pub strategy: Option<Strategy>,
    pub requires_javascript: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleReport {
    fn names_where(&self, f: impl Fn(&SourceStatus) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| f(&o.status))
            .map(|o| o.source.as_str())
            .collect()
    }

    pub fn reported(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, SourceStatus::Reported { .. }))
    }

    pub fn empty(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, SourceStatus::Empty { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, SourceStatus::Failed { .. }))
    }
}

pub struct MonitoringEngine {
    config: MonitorConfig,
    extractor: Extractor,
    analyzer: AnalysisEngine,
    fingerprints: FingerprintStore,
    trends: TrendAccumulator,
    store: Arc<dyn StateStore>,
}

impl MonitoringEngine {
    /// Seeds fingerprint sets and trend histories from the store.
    pub fn new(
        config: MonitorConfig,
        extractor: Extractor,
        analyzer: AnalysisEngine,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let fingerprints = FingerprintStore::from_sets(
            config.fingerprint_cap,
            store.load_fingerprints().context("loading fingerprints")?,
        );
        let trends = TrendAccumulator::from_histories(
            config.history_cap,
            config.min_trend_entries,
            store.load_histories().context("loading trend histories")?,
        );
        tracing::info!(
            target: "monitor",
            fingerprint_sets = fingerprints.len(),
            histories = trends.len(),
            provider = analyzer.provider_name(),
            "monitoring engine ready"
        );
        Ok(Self {
            config,
            extractor,
            analyzer,
            fingerprints,
            trends,
            store,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    pub fn trends(&self) -> &TrendAccumulator {
        &self.trends
    }

    /// One pass over every enabled source, in registration order.
    pub async fn run_cycle(
        &mut self,
        registry: &mut SourceRegistry,
        context: &CompanyContext,
    ) -> CycleReport {
        ensure_metrics_described();
        let t0 = Instant::now();
        let started_at = Utc::now();
        let sources = registry.enabled();
        let mut findings = Vec::new();
        let mut outcomes = Vec::with_capacity(sources.len());

        tracing::info!(target: "monitor", sources = sources.len(), "cycle started");
        for (i, source) in sources.iter().enumerate() {
            if i > 0 && !self.config.rate_limit().is_zero() {
                tokio::time::sleep(self.config.rate_limit()).await;
            }
            let (outcome, finding) = self.process(source, context).await;
            if let Err(e) = registry.mark_checked(&source.name, outcome.checked_at) {
                // Removed mid-cycle by another owner of the registry.
                tracing::warn!(target: "monitor", source = %source.name, error = %e, "could not mark source checked");
            }
            findings.extend(finding);
            outcomes.push(outcome);
        }

        let finished_at = Utc::now();
        histogram!("monitor_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("monitor_last_cycle_ts").set(finished_at.timestamp() as f64);
        let report = CycleReport {
            started_at,
            finished_at,
            findings,
            outcomes,
        };
        tracing::info!(
            target: "monitor",
            reported = report.reported().len(),
            empty = report.empty().len(),
            failed = report.failed().len(),
            "cycle finished"
        );
        report
    }

    /// Runs the pipeline for one named source, enabled or not.
    pub async fn check_source(
        &mut self,
        registry: &mut SourceRegistry,
        name: &str,
        context: &CompanyContext,
    ) -> Result<(SourceOutcome, Option<Finding>), RegistryError> {
        ensure_metrics_described();
        let source = registry
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let (outcome, finding) = self.process(&source, context).await;
        registry.mark_checked(&source.name, outcome.checked_at)?;
        Ok((outcome, finding))
    }

    /// Forgets reported fingerprints (one source or all); trend history is kept.
    pub fn reset_cache(&mut self, source: Option<&str>) -> Result<usize> {
        let cleared = self.fingerprints.reset(source);
        let key = source.map(crate::model::source_key);
        self.store
            .clear_fingerprints(key.as_deref())
            .context("clearing persisted fingerprints")?;
        tracing::info!(target: "monitor", source = ?source, cleared, "fingerprint cache reset");
        Ok(cleared)
    }

    pub fn trend(&self, source: &str) -> Trend {
        self.trends.compute_trend(source)
    }

    pub fn compare(&self, a: &str, b: &str) -> Result<Comparison, TrendError> {
        self.trends.compare(a, b)
    }

    async fn process(
        &mut self,
        source: &Source,
        context: &CompanyContext,
    ) -> (SourceOutcome, Option<Finding>) {
        let key = source.key();
        let mut outcome = SourceOutcome {
            source: source.name.clone(),
            status: SourceStatus::Empty {
                reason: EmptyReason::NoContent,
            },
            strategy: None,
            requires_javascript: false,
            checked_at: Utc::now(),
        };

        // EXTRACTING
        let extraction = self.extractor.extract(source).await;
        outcome.strategy = extraction.used;
        outcome.requires_javascript = extraction.likely_requires_javascript();
        if extraction.updates.is_empty() {
            outcome.status = if extraction.all_failed() {
                let error = extraction.first_error().unwrap_or("unknown error").to_string();
                tracing::warn!(target: "monitor", source = %source.name, error = %error, "extraction failed");
                SourceStatus::Failed {
                    phase: Phase::Extracting,
                    error,
                }
            } else {
                if outcome.requires_javascript && source.feed_url.is_none() {
                    tracing::info!(
                        target: "monitor",
                        source = %source.name,
                        "page looks script-rendered; add a feed address for reliable monitoring"
                    );
                }
                SourceStatus::Empty {
                    reason: EmptyReason::NoContent,
                }
            };
            return self.finish(outcome, None);
        }

        // FILTERING (commits fingerprints before any analysis runs)
        let candidates = extraction.updates.len();
        let unseen = self.fingerprints.filter(&key, extraction.updates);
        if unseen.is_empty() {
            tracing::debug!(target: "monitor", source = %source.name, candidates, "nothing unseen");
            outcome.status = SourceStatus::Empty {
                reason: EmptyReason::NoUnseen,
            };
            return self.finish(outcome, None);
        }
        if let Some(set) = self.fingerprints.set_for(&key) {
            // On failure the set stays committed in memory; the next save writes it whole.
            if let Err(e) = self.store.save_fingerprints(&key, set) {
                counter!("monitor_persist_errors_total", "kind" => "fingerprints").increment(1);
                tracing::warn!(target: "monitor", source = %source.name, error = ?e, "persisting fingerprints failed");
            }
        }

        // ANALYZING
        let budget = self.config.analysis_timeout() * 2;
        let analysis = match tokio::time::timeout(
            budget,
            self.analyzer.analyze(source, Some(context), &unseen),
        )
        .await
        {
            Ok(a) => a,
            Err(_) => {
                outcome.status = SourceStatus::Failed {
                    phase: Phase::Analyzing,
                    error: format!("analysis exceeded {budget:?}"),
                };
                tracing::warn!(target: "monitor", source = %source.name, "analysis stalled");
                return self.finish(outcome, None);
            }
        };

        // RECORDING
        let carried = unseen.len().min(self.config.max_updates_per_finding.max(1));
        let mut finding = Finding::new(source.clone(), &unseen[..carried], analysis);
        finding.source.last_checked = Some(outcome.checked_at);
        let history = self.trends.record_finding(&finding);
        if let Err(e) = self.store.save_history(&key, history) {
            counter!("monitor_persist_errors_total", "kind" => "history").increment(1);
            tracing::warn!(target: "monitor", source = %source.name, error = ?e, "persisting trend history failed");
        }

        tracing::info!(
            target: "monitor",
            source = %source.name,
            new_updates = unseen.len(),
            impact = %finding.analysis.impact,
            method = ?finding.analysis.method,
            "finding reported"
        );
        outcome.status = SourceStatus::Reported {
            new_updates: unseen.len(),
        };
        self.finish(outcome, Some(finding))
    }

    fn finish(
        &self,
        outcome: SourceOutcome,
        finding: Option<Finding>,
    ) -> (SourceOutcome, Option<Finding>) {
        counter!("monitor_sources_checked_total", "status" => outcome.status.label()).increment(1);
        if finding.is_some() {
            counter!("monitor_findings_total").increment(1);
        }
        (outcome, finding)
    }
}
