// src/analyze/mod.rs
//! Analysis engine: reasoning service first, rule-based fallback always available.
//!
//! `analyze` never fails. Service errors, timeouts and invalid payloads all end
//! in the deterministic fallback, whose confidence stays below
//! `PRIMARY_CONFIDENCE_FLOOR`.

pub mod ai_adapter;
pub mod prompt;
pub mod rules;
pub mod validate;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::model::{Analysis, CompanyContext, Source, Update};
use ai_adapter::{DisabledClient, DynReasoningClient, ReasoningError};
use rules::KeywordSet;
use validate::ValidationError;

// Re-export convenient types.
pub use ai_adapter::{ReasoningClient, ReasoningRequest};
pub use rules::fallback_analysis;

/// Primary-path results are lifted to at least this; fallback stays below it.
pub const PRIMARY_CONFIDENCE_FLOOR: f32 = 0.5;
/// Updates sent downstream per analysis.
pub const MAX_BATCH: usize = 5;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analyze_primary_total", "Analyses produced by the reasoning service.");
        describe_counter!(
            "analyze_fallback_total",
            "Analyses produced by the rule-based fallback, by reason."
        );
        describe_histogram!("analyze_latency_ms", "Reasoning call latency in milliseconds.");
    });
}

/// Why the primary path was abandoned. Logged, never returned to callers.
#[derive(Debug, Error)]
pub enum PrimaryFailure {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Service(#[from] ReasoningError),
    #[error("invalid reasoning payload: {0}")]
    Invalid(#[from] ValidationError),
    #[error("analysis limiter closed")]
    Closed,
}

impl PrimaryFailure {
    fn label(&self) -> &'static str {
        match self {
            PrimaryFailure::Timeout(_) => "timeout",
            PrimaryFailure::Service(ReasoningError::Disabled) => "disabled",
            PrimaryFailure::Service(ReasoningError::LimitReached(_)) => "limit",
            PrimaryFailure::Service(_) => "service",
            PrimaryFailure::Invalid(_) => "invalid",
            PrimaryFailure::Closed => "closed",
        }
    }
}

pub struct AnalysisEngine {
    client: DynReasoningClient,
    keywords: KeywordSet,
    timeout: Duration,
    /// Bounds concurrent in-flight reasoning calls.
    permits: Arc<Semaphore>,
}

impl AnalysisEngine {
    pub fn new(client: DynReasoningClient, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            client,
            keywords: KeywordSet::default(),
            timeout,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Fallback-only engine.
    pub fn rule_based() -> Self {
        Self::new(Arc::new(DisabledClient), Duration::from_secs(1), 1)
    }

    pub fn with_keywords(mut self, keywords: KeywordSet) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    pub async fn analyze(
        &self,
        source: &Source,
        context: Option<&CompanyContext>,
        updates: &[Update],
    ) -> Analysis {
        ensure_metrics_described();
        let default_ctx;
        let ctx = match context {
            Some(c) => c,
            None => {
                default_ctx = CompanyContext::default();
                &default_ctx
            }
        };
        let batch = select_batch(updates);

        match self.primary(source, ctx, &batch).await {
            Ok(mut analysis) => {
                analysis.confidence = analysis.confidence.max(PRIMARY_CONFIDENCE_FLOOR);
                counter!("analyze_primary_total").increment(1);
                tracing::debug!(
                    target: "analyze",
                    source = %source.name,
                    provider = self.client.provider_name(),
                    impact = %analysis.impact,
                    "reasoning analysis accepted"
                );
                analysis
            }
            Err(e) => {
                counter!("analyze_fallback_total", "reason" => e.label()).increment(1);
                if matches!(e, PrimaryFailure::Service(ReasoningError::Disabled)) {
                    tracing::debug!(target: "analyze", source = %source.name, "reasoning disabled, rule-based analysis");
                } else {
                    tracing::warn!(
                        target: "analyze",
                        source = %source.name,
                        provider = self.client.provider_name(),
                        error = %e,
                        "reasoning failed, using rule-based analysis"
                    );
                }
                rules::fallback_analysis(source, ctx, &batch, &self.keywords)
            }
        }
    }

    async fn primary(
        &self,
        source: &Source,
        ctx: &CompanyContext,
        batch: &[Update],
    ) -> Result<Analysis, PrimaryFailure> {
        let req = prompt::build_request(source, ctx, batch);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PrimaryFailure::Closed)?;

        let t0 = Instant::now();
        let raw = tokio::time::timeout(self.timeout, self.client.complete(&req))
            .await
            .map_err(|_| PrimaryFailure::Timeout(self.timeout))??;
        histogram!("analyze_latency_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        Ok(validate::parse_analysis(&raw)?)
    }
}

/// Most recent `MAX_BATCH` by detection time; ties keep extraction order.
pub fn select_batch(updates: &[Update]) -> Vec<Update> {
    let mut sorted: Vec<Update> = updates.to_vec();
    sorted.sort_by(|a, b| b.detected_at().cmp(&a.detected_at()));
    sorted.truncate(MAX_BATCH);
    sorted
}
