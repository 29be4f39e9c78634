// src/extract/mod.rs
//! Content extraction: an ordered chain of strategies, evaluated until one yields updates.
//!
//! Every strategy is fault tolerant. Fetch or parse errors are recorded in the
//! returned `Extraction` as a failed attempt and the chain moves on.

pub mod feed;
pub mod fetch;
pub mod page;
pub mod search;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::model::{Source, Update};
use fetch::PageFetcher;
use search::SearchProvider;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "extract_attempts_total",
            "Strategy attempts by strategy and outcome."
        );
        describe_counter!("extract_updates_total", "Update candidates produced.");
        describe_histogram!("extract_parse_ms", "Feed/page parse time in milliseconds.");
    });
}

/// Tagged extraction strategies, in default evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Feed,
    StructuredPage,
    AggressivePage,
    Search,
}

impl Strategy {
    pub const DEFAULT_CHAIN: [Strategy; 4] = [
        Strategy::Feed,
        Strategy::StructuredPage,
        Strategy::AggressivePage,
        Strategy::Search,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Feed => "feed",
            Strategy::StructuredPage => "structured_page",
            Strategy::AggressivePage => "aggressive_page",
            Strategy::Search => "search",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Yielded(usize),
    Empty,
    Failed(String),
    /// Not applicable to this source (no feed address, no page, no search provider).
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
}

/// Result of running the chain for one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub updates: Vec<Update>,
    pub attempts: Vec<Attempt>,
    pub used: Option<Strategy>,
}

impl Extraction {
    /// Every applicable strategy errored (as opposed to "ran and found nothing").
    pub fn all_failed(&self) -> bool {
        let mut ran = self
            .attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Skipped)
            .peekable();
        ran.peek().is_some() && ran.all(|a| matches!(a.outcome, AttemptOutcome::Failed(_)))
    }

    pub fn first_error(&self) -> Option<&str> {
        self.attempts.iter().find_map(|a| match &a.outcome {
            AttemptOutcome::Failed(e) => Some(e.as_str()),
            _ => None,
        })
    }

    /// Page fetched fine but neither page strategy found anything: the content is
    /// most likely rendered client-side.
    pub fn likely_requires_javascript(&self) -> bool {
        let outcome = |s: Strategy| {
            self.attempts
                .iter()
                .find(|a| a.strategy == s)
                .map(|a| &a.outcome)
        };
        outcome(Strategy::StructuredPage) == Some(&AttemptOutcome::Empty)
            && outcome(Strategy::AggressivePage) == Some(&AttemptOutcome::Empty)
    }

    fn push(&mut self, strategy: Strategy, outcome: AttemptOutcome) {
        let label = match &outcome {
            AttemptOutcome::Yielded(_) => "yielded",
            AttemptOutcome::Empty => "empty",
            AttemptOutcome::Failed(_) => "failed",
            AttemptOutcome::Skipped => "skipped",
        };
        counter!("extract_attempts_total", "strategy" => strategy.name(), "outcome" => label)
            .increment(1);
        self.attempts.push(Attempt { strategy, outcome });
    }
}

/// Runs the strategy chain against a fetcher and an optional search provider.
pub struct Extractor {
    fetcher: Arc<dyn PageFetcher>,
    search: Option<Arc<dyn SearchProvider>>,
    chain: Vec<Strategy>,
    search_limit: usize,
}

/// Page body shared by both page strategies, fetched at most once per run.
enum PageState {
    NotFetched,
    Fetched(String),
    Failed(String),
}

impl Extractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, search: Option<Arc<dyn SearchProvider>>) -> Self {
        Self {
            fetcher,
            search,
            chain: Strategy::DEFAULT_CHAIN.to_vec(),
            search_limit: search::DEFAULT_RESULT_LIMIT,
        }
    }

    /// Override the evaluation order (e.g. drop `Search`).
    pub fn with_chain(mut self, chain: Vec<Strategy>) -> Self {
        self.chain = chain;
        self
    }

    pub async fn extract(&self, source: &Source) -> Extraction {
        ensure_metrics_described();
        let at = Utc::now();
        let mut out = Extraction::default();
        let mut fetched = PageState::NotFetched;

        for &strategy in &self.chain {
            let outcome = match self.run(strategy, source, at, &mut fetched).await {
                StrategyRun::Skipped => AttemptOutcome::Skipped,
                StrategyRun::Failed(e) => {
                    tracing::warn!(
                        target: "extract",
                        source = %source.name,
                        strategy = %strategy,
                        error = %e,
                        "strategy failed"
                    );
                    AttemptOutcome::Failed(e)
                }
                StrategyRun::Done(updates) if updates.is_empty() => AttemptOutcome::Empty,
                StrategyRun::Done(updates) => {
                    let n = updates.len();
                    counter!("extract_updates_total").increment(n as u64);
                    tracing::info!(
                        target: "extract",
                        source = %source.name,
                        strategy = %strategy,
                        updates = n,
                        "strategy yielded updates"
                    );
                    out.updates = updates;
                    out.used = Some(strategy);
                    out.push(strategy, AttemptOutcome::Yielded(n));
                    break;
                }
            };
            out.push(strategy, outcome);
        }
        out
    }

    async fn run(
        &self,
        strategy: Strategy,
        source: &Source,
        at: DateTime<Utc>,
        fetched: &mut PageState,
    ) -> StrategyRun {
        match strategy {
            Strategy::Feed => {
                let Some(url) = non_blank(source.feed_url.as_deref()) else {
                    return StrategyRun::Skipped;
                };
                match self.fetcher.fetch(url).await {
                    Ok(xml) => timed(|| feed::parse_feed(&xml, url, at))
                        .map(StrategyRun::Done)
                        .unwrap_or_else(|e| StrategyRun::Failed(format!("{e:#}"))),
                    Err(e) => StrategyRun::Failed(format!("{e:#}")),
                }
            }
            Strategy::StructuredPage | Strategy::AggressivePage => {
                let Some(url) = non_blank(source.page_url.as_deref()) else {
                    return StrategyRun::Skipped;
                };
                if let PageState::NotFetched = fetched {
                    *fetched = match self.fetcher.fetch(url).await {
                        Ok(html) => PageState::Fetched(html),
                        Err(e) => PageState::Failed(format!("{e:#}")),
                    };
                }
                match fetched {
                    PageState::Fetched(html) => {
                        let updates = if strategy == Strategy::StructuredPage {
                            timed(|| Ok(page::structured(html, url, at)))
                        } else {
                            timed(|| Ok(page::aggressive(html, url, at)))
                        };
                        updates
                            .map(StrategyRun::Done)
                            .unwrap_or_else(|e| StrategyRun::Failed(format!("{e:#}")))
                    }
                    PageState::Failed(e) => StrategyRun::Failed(e.clone()),
                    PageState::NotFetched => StrategyRun::Skipped,
                }
            }
            Strategy::Search => {
                let Some(provider) = &self.search else {
                    return StrategyRun::Skipped;
                };
                let query = search::build_query(source, at);
                match provider.search(&query, self.search_limit).await {
                    Ok(hits) => {
                        let fallback_url = source
                            .page_url
                            .as_deref()
                            .or(source.feed_url.as_deref())
                            .unwrap_or_default();
                        StrategyRun::Done(search::hits_to_updates(hits, fallback_url, at))
                    }
                    Err(e) => StrategyRun::Failed(format!("{e:#}")),
                }
            }
        }
    }
}

enum StrategyRun {
    Done(Vec<Update>),
    Failed(String),
    Skipped,
}

fn timed<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    let t0 = std::time::Instant::now();
    let out = f();
    histogram!("extract_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    out
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|v| !v.is_empty())
}

/// Normalize markup-bearing text: decode entities, strip tags, straighten quotes,
/// collapse whitespace.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z!][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
