use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intel_monitor::ai_adapter::{
    ReasoningClient, ReasoningError, ReasoningFuture, ReasoningRequest,
};
use intel_monitor::config::MonitorConfig;
use intel_monitor::extract::fetch::StaticFetcher;
use intel_monitor::extract::search::{SearchHit, SearchProvider};
use intel_monitor::extract::Strategy;
use intel_monitor::fingerprint::FingerprintSet;
use intel_monitor::monitor::{EmptyReason, Phase};
use intel_monitor::store::{FileStore, MemoryStore, StateStore};
use intel_monitor::trend::TrendHistory;
use intel_monitor::{
    AnalysisEngine, AnalysisMethod, CompanyContext, Direction, Extractor, Impact,
    MonitoringEngine, NewSource, SourceRegistry, SourceStatus, TrendError,
    PRIMARY_CONFIDENCE_FLOOR,
};

const ACME_FEED: &str = "https://acme.test/feed.xml";
const BETA_PAGE: &str = "https://beta.test/changelog";
const GAMMA_FEED: &str = "https://gamma.test/rss";

const ACME_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Acme product updates</title>
  <item>
    <title>Launch of Acme Cloud</title>
    <link>https://acme.test/cloud</link>
    <pubDate>Mon, 06 Jan 2025 10:00:00 +0000</pubDate>
    <description>Acme Cloud is generally available in three regions.</description>
  </item>
  <item>
    <title>New integrations with Slack</title>
    <link>https://acme.test/slack</link>
    <description>Post alerts straight into your channels.</description>
  </item>
  <item>
    <title>Improved dashboard filters</title>
    <link>https://acme.test/filters</link>
    <description>Filter dashboards by team and date range.</description>
  </item>
</channel></rss>"#;

const BETA_HTML: &str = r#"<html><body><div class="wrapper">
  <h2>Realtime collaboration arrives</h2>
  <p>Multiple editors can now work on the same board at once.</p>
  <h3>New pricing for teams</h3>
  <p>Team plans now start at a lower per-seat price.</p>
</div></body></html>"#;

const GAMMA_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><title>Gamma launches enterprise tier</title><description>SSO and audit logs.</description></item>
</channel></rss>"#;

const JS_SHELL: &str = r#"<html><head><script>window.boot()</script></head>
<body><div id="root"></div></body></html>"#;

const VALID_ANALYSIS: &str = r#"{
  "summary": "Acme is pushing into managed cloud.",
  "key_features": ["Acme Cloud", "Slack integration"],
  "impact": "High",
  "recommended_action": "Review our hosted offering roadmap.",
  "threat_level": "Medium",
  "opportunities": ["Target customers needing on-prem"],
  "confidence": 0.3
}"#;

/// Returns the same canned response for every request.
struct Scripted(Result<String, ReasoningError>);

impl ReasoningClient for Scripted {
    fn complete<'a>(&'a self, _req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        let out = self.0.clone();
        Box::pin(async move { out })
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Answers only after `delay`.
struct Slow(Duration);

impl ReasoningClient for Slow {
    fn complete<'a>(&'a self, _req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            Ok(VALID_ANALYSIS.to_string())
        })
    }
    fn provider_name(&self) -> &'static str {
        "slow"
    }
}

struct FixedSearch(Vec<SearchHit>);

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Memory-backed store whose writes fail while `broken` is set.
#[derive(Default)]
struct BrokenWrites {
    inner: MemoryStore,
    broken: AtomicBool,
}

impl BrokenWrites {
    fn check(&self) -> anyhow::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

impl StateStore for BrokenWrites {
    fn load_fingerprints(&self) -> anyhow::Result<HashMap<String, FingerprintSet>> {
        self.inner.load_fingerprints()
    }
    fn save_fingerprints(&self, key: &str, set: &FingerprintSet) -> anyhow::Result<()> {
        self.check()?;
        self.inner.save_fingerprints(key, set)
    }
    fn clear_fingerprints(&self, key: Option<&str>) -> anyhow::Result<()> {
        self.inner.clear_fingerprints(key)
    }
    fn load_histories(&self) -> anyhow::Result<HashMap<String, TrendHistory>> {
        self.inner.load_histories()
    }
    fn save_history(&self, key: &str, history: &TrendHistory) -> anyhow::Result<()> {
        self.check()?;
        self.inner.save_history(key, history)
    }
}

fn fetcher() -> StaticFetcher {
    StaticFetcher::new()
        .with_page(ACME_FEED, ACME_RSS)
        .with_page(BETA_PAGE, BETA_HTML)
        .with_page(GAMMA_FEED, GAMMA_RSS)
}

fn cfg() -> MonitorConfig {
    MonitorConfig {
        rate_limit_secs: 0,
        ..Default::default()
    }
}

fn engine_with(client: Arc<dyn ReasoningClient>, store: Arc<dyn StateStore>) -> MonitoringEngine {
    let extractor = Extractor::new(Arc::new(fetcher()), None);
    let analyzer = AnalysisEngine::new(client, Duration::from_millis(200), 2);
    MonitoringEngine::new(cfg(), extractor, analyzer, store).unwrap()
}

fn registry() -> SourceRegistry {
    let mut reg = SourceRegistry::new();
    reg.register(NewSource::new("Acme").feed(ACME_FEED).category("Analytics"))
        .unwrap();
    reg.register(NewSource::new("Beta").page(BETA_PAGE)).unwrap();
    reg
}

#[tokio::test]
async fn feed_source_reports_every_entry_with_reasoning_analysis() {
    let mut engine = engine_with(
        Arc::new(Scripted(Ok(VALID_ANALYSIS.to_string()))),
        Arc::new(MemoryStore::new()),
    );
    let mut reg = registry();
    let report = engine.run_cycle(&mut reg, &CompanyContext::default()).await;

    assert_eq!(report.reported(), vec!["Acme", "Beta"]);
    let acme = &report.findings[0];
    assert_eq!(acme.source.name, "Acme");
    assert_eq!(acme.updates.len(), 3);
    assert_eq!(acme.analysis.method, AnalysisMethod::Reasoning);
    assert_eq!(acme.analysis.impact, Impact::High);
    // Service said 0.3; primary results never drop below the floor.
    assert!(acme.analysis.confidence >= PRIMARY_CONFIDENCE_FLOOR);
    assert!(acme.updates.iter().all(|u| u.impact() == Impact::High));

    assert_eq!(report.outcomes[0].strategy, Some(Strategy::Feed));
    assert_eq!(engine.fingerprints().set_for("Acme").unwrap().len(), 3);
}

#[tokio::test]
async fn page_source_falls_through_to_aggressive_extraction() {
    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(MemoryStore::new()));
    let mut reg = registry();
    let (outcome, finding) = engine
        .check_source(&mut reg, "Beta", &CompanyContext::default())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, Some(Strategy::AggressivePage));
    assert!(!outcome.requires_javascript);
    let finding = finding.unwrap();
    let titles: Vec<_> = finding.updates.iter().map(|u| u.title()).collect();
    assert_eq!(
        titles,
        vec!["Realtime collaboration arrives", "New pricing for teams"]
    );
    assert_eq!(finding.analysis.method, AnalysisMethod::RuleBased);
}

#[tokio::test]
async fn slow_reasoning_degrades_to_rules() {
    let mut engine = engine_with(
        Arc::new(Slow(Duration::from_secs(5))),
        Arc::new(MemoryStore::new()),
    );
    let mut reg = SourceRegistry::new();
    reg.register(NewSource::new("Gamma").feed(GAMMA_FEED)).unwrap();

    let report = engine.run_cycle(&mut reg, &CompanyContext::default()).await;
    assert_eq!(report.reported(), vec!["Gamma"]);
    let a = &report.findings[0].analysis;
    assert_eq!(a.method, AnalysisMethod::RuleBased);
    assert!(a.confidence < PRIMARY_CONFIDENCE_FLOOR);
    assert!(a.summary.starts_with("Gamma released:"));
}

#[tokio::test]
async fn incomplete_or_failed_reasoning_uses_fallback() {
    let missing_confidence =
        r#"{"summary":"x","key_features":[],"impact":"High","recommended_action":"y","threat_level":"Low"}"#;
    for client in [
        Scripted(Ok(missing_confidence.to_string())),
        Scripted(Ok("not json at all".to_string())),
        Scripted(Err(ReasoningError::Transport("connection reset".into()))),
        Scripted(Err(ReasoningError::Status(503))),
    ] {
        let mut engine = engine_with(Arc::new(client), Arc::new(MemoryStore::new()));
        let mut reg = registry();
        let (_, finding) = engine
            .check_source(&mut reg, "Acme", &CompanyContext::default())
            .await
            .unwrap();
        let a = finding.unwrap().analysis;
        assert_eq!(a.method, AnalysisMethod::RuleBased);
        assert!(a.confidence < PRIMARY_CONFIDENCE_FLOOR);
        // "Launch" is the strongest keyword in the batch.
        assert_eq!(a.impact, Impact::High);
    }
}

#[tokio::test]
async fn second_cycle_reports_nothing_new() {
    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(MemoryStore::new()));
    let mut reg = registry();
    let ctx = CompanyContext::default();

    let first = engine.run_cycle(&mut reg, &ctx).await;
    assert_eq!(first.findings.len(), 2);
    let checked_before = reg.get("Acme").unwrap().last_checked.unwrap();
    let set_before = engine.fingerprints().set_for("Acme").unwrap().clone();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = engine.run_cycle(&mut reg, &ctx).await;
    assert!(second.findings.is_empty());
    assert_eq!(second.empty(), vec!["Acme", "Beta"]);
    assert!(second.outcomes.iter().all(|o| o.status
        == SourceStatus::Empty {
            reason: EmptyReason::NoUnseen
        }));
    assert_eq!(engine.fingerprints().set_for("Acme").unwrap(), &set_before);
    assert!(reg.get("Acme").unwrap().last_checked.unwrap() > checked_before);
}

#[tokio::test]
async fn unreachable_source_fails_alone() {
    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(MemoryStore::new()));
    let mut reg = registry();
    reg.register(NewSource::new("Delta").page("https://delta.test/404"))
        .unwrap();

    let report = engine.run_cycle(&mut reg, &CompanyContext::default()).await;
    assert_eq!(report.reported(), vec!["Acme", "Beta"]);
    assert_eq!(report.failed(), vec!["Delta"]);
    match &report.outcomes[2].status {
        SourceStatus::Failed { phase, error } => {
            assert_eq!(*phase, Phase::Extracting);
            assert!(error.contains("delta.test"));
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(reg.get("Delta").unwrap().last_checked.is_some());
    assert!(engine.fingerprints().set_for("Delta").is_none());
}

#[tokio::test]
async fn script_rendered_page_uses_search() {
    let hits = vec![SearchHit {
        title: "Epsilon ships offline mode".into(),
        snippet: "Epsilon apps now work without a connection.".into(),
        url: "https://news.test/epsilon".into(),
    }];
    let fetcher = StaticFetcher::new().with_page("https://epsilon.test", JS_SHELL);
    let extractor = Extractor::new(Arc::new(fetcher), Some(Arc::new(FixedSearch(hits))));
    let mut engine = MonitoringEngine::new(
        cfg(),
        extractor,
        AnalysisEngine::rule_based(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let mut reg = SourceRegistry::new();
    reg.register(NewSource::new("Epsilon").page("https://epsilon.test"))
        .unwrap();

    let (outcome, finding) = engine
        .check_source(&mut reg, "Epsilon", &CompanyContext::default())
        .await
        .unwrap();
    assert_eq!(outcome.strategy, Some(Strategy::Search));
    assert!(outcome.requires_javascript);
    assert_eq!(finding.unwrap().updates[0].title(), "Epsilon ships offline mode");
}

#[tokio::test]
async fn findings_carry_a_bounded_number_of_updates() {
    let extractor = Extractor::new(Arc::new(fetcher()), None);
    let config = MonitorConfig {
        max_updates_per_finding: 2,
        ..cfg()
    };
    let mut engine = MonitoringEngine::new(
        config,
        extractor,
        AnalysisEngine::rule_based(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let mut reg = registry();
    let (outcome, finding) = engine
        .check_source(&mut reg, "Acme", &CompanyContext::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, SourceStatus::Reported { new_updates: 3 });
    assert_eq!(finding.unwrap().updates.len(), 2);
}

#[tokio::test]
async fn state_survives_restart_and_reset_cache() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CompanyContext::default();
    let mut reg = registry();
    {
        let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(FileStore::new(dir.path())));
        assert_eq!(engine.run_cycle(&mut reg, &ctx).await.findings.len(), 2);
    }

    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(FileStore::new(dir.path())));
    assert_eq!(engine.fingerprints().len(), 2);
    assert_eq!(engine.trend("Acme").total_entries, 1);
    assert!(engine.run_cycle(&mut reg, &ctx).await.findings.is_empty());

    assert_eq!(engine.reset_cache(Some("Acme")).unwrap(), 1);
    let report = engine.run_cycle(&mut reg, &ctx).await;
    assert_eq!(report.reported(), vec!["Acme"]);
    // Trend history is not part of the cache.
    assert_eq!(engine.trend("Acme").total_entries, 2);

    let reopened = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(FileStore::new(dir.path())));
    assert_eq!(reopened.fingerprints().set_for("Acme").unwrap().len(), 3);
}

#[tokio::test]
async fn trend_needs_history() {
    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), Arc::new(MemoryStore::new()));
    let mut reg = registry();
    engine.run_cycle(&mut reg, &CompanyContext::default()).await;

    let t = engine.trend("Acme");
    assert_eq!(t.direction, Direction::InsufficientData);
    assert_eq!(t.total_entries, 1);
    assert_eq!(
        engine.compare("Acme", "Unknown Co").unwrap_err(),
        TrendError::NoHistory("Unknown Co".into())
    );
    let cmp = engine.compare("Acme", "Beta").unwrap();
    assert_eq!(cmp.more_active, None);
}

#[tokio::test]
async fn failed_state_writes_do_not_lose_the_finding() {
    let store = Arc::new(BrokenWrites::default());
    store.broken.store(true, Ordering::SeqCst);
    let mut engine = engine_with(Arc::new(Scripted(Err(ReasoningError::Disabled))), store.clone());
    let mut reg = SourceRegistry::new();
    reg.register(NewSource::new("Acme").feed(ACME_FEED)).unwrap();
    let ctx = CompanyContext::default();

    let first = engine.run_cycle(&mut reg, &ctx).await;
    assert_eq!(first.reported(), vec!["Acme"]);
    assert_eq!(first.findings[0].updates.len(), 3);
    assert_eq!(engine.trend("Acme").total_entries, 1);
    assert!(store.load_fingerprints().unwrap().is_empty());

    // Still deduplicated in memory.
    let second = engine.run_cycle(&mut reg, &ctx).await;
    assert_eq!(second.empty(), vec!["Acme"]);

    // Once writes work again the full set lands on the next commit.
    store.broken.store(false, Ordering::SeqCst);
    engine.reset_cache(Some("Acme")).unwrap();
    engine.run_cycle(&mut reg, &ctx).await;
    assert_eq!(store.load_fingerprints().unwrap()["acme"].len(), 3);
}

#[tokio::test(start_paused = true)]
async fn sources_are_spaced_by_the_rate_limit() {
    let extractor = Extractor::new(Arc::new(fetcher()), None);
    let config = MonitorConfig {
        rate_limit_secs: 3,
        ..Default::default()
    };
    let mut engine = MonitoringEngine::new(
        config,
        extractor,
        AnalysisEngine::rule_based(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let mut reg = registry();

    let t0 = tokio::time::Instant::now();
    let report = engine.run_cycle(&mut reg, &CompanyContext::default()).await;
    assert_eq!(report.outcomes.len(), 2);
    assert!(t0.elapsed() >= Duration::from_secs(3));
    assert!(t0.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn stalled_analysis_fails_but_keeps_fingerprints() {
    let extractor = Extractor::new(Arc::new(fetcher()), None);
    let config = MonitorConfig {
        rate_limit_secs: 0,
        analysis_timeout_secs: 1,
        ..Default::default()
    };
    // The engine's own timeout outlasts the monitor's stage budget.
    let analyzer = AnalysisEngine::new(
        Arc::new(Slow(Duration::from_secs(600))),
        Duration::from_secs(300),
        1,
    );
    let mut engine =
        MonitoringEngine::new(config, extractor, analyzer, Arc::new(MemoryStore::new())).unwrap();
    let mut reg = SourceRegistry::new();
    reg.register(NewSource::new("Acme").feed(ACME_FEED)).unwrap();
    let ctx = CompanyContext::default();

    let (outcome, finding) = engine.check_source(&mut reg, "Acme", &ctx).await.unwrap();
    assert!(finding.is_none());
    assert!(matches!(
        outcome.status,
        SourceStatus::Failed {
            phase: Phase::Analyzing,
            ..
        }
    ));
    assert_eq!(engine.fingerprints().set_for("Acme").unwrap().len(), 3);
    assert_eq!(engine.trend("Acme").total_entries, 0);
    assert!(reg.get("Acme").unwrap().last_checked.is_some());

    let (again, _) = engine.check_source(&mut reg, "Acme", &ctx).await.unwrap();
    assert_eq!(
        again.status,
        SourceStatus::Empty {
            reason: EmptyReason::NoUnseen
        }
    );
}
