//! Competitor monitor binary entrypoint.
//! Loads configuration and state, then runs one cycle or the periodic scheduler.
//!
//! Usage:
//!   intel-monitor                      run cycles every `check_interval_hours`
//!   intel-monitor --once               run one cycle, print the report as JSON
//!   intel-monitor --check <name>       run one source now
//!   intel-monitor --list               print registered sources
//!   intel-monitor --trend <name>       print the trend for a source
//!   intel-monitor --compare <a> <b>    compare two sources' trends
//!   intel-monitor --reset-cache [name] forget reported fingerprints

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use intel_monitor::analyze::ai_adapter::build_client_from_config;
use intel_monitor::analyze::rules::{load_keywords_or_default, DEFAULT_KEYWORDS_PATH};
use intel_monitor::config::ai::{AiConfig, DEFAULT_AI_CONFIG_PATH};
use intel_monitor::config::{load_company_context, load_monitor_config_default};
use intel_monitor::extract::fetch::HttpFetcher;
use intel_monitor::extract::search::{DuckDuckGoSearch, SearchProvider};
use intel_monitor::registry::DEFAULT_REGISTRY_FILE;
use intel_monitor::scheduler::{spawn_scheduler, SchedulerCfg};
use intel_monitor::store::FileStore;
use intel_monitor::{AnalysisEngine, Extractor, MonitoringEngine, SourceRegistry};

const DEFAULT_FILTER: &str = "intel_monitor=info,monitor=info,extract=info,analyze=info,trend=info,warn";

/// Compact logs by default; JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Once,
    Check(String),
    List,
    Trend(String),
    Compare(String, String),
    ResetCache(Option<String>),
}

fn parse_command(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let Some(flag) = args.next() else {
        return Ok(Command::Run);
    };
    let cmd = match flag.as_str() {
        "--once" => Command::Once,
        "--list" => Command::List,
        "--check" => Command::Check(required(&mut args, &flag)?),
        "--trend" => Command::Trend(required(&mut args, &flag)?),
        "--compare" => {
            let a = required(&mut args, &flag)?;
            Command::Compare(a, required(&mut args, &flag)?)
        }
        "--reset-cache" => Command::ResetCache(args.next()),
        other => bail!("unknown argument {other:?}"),
    };
    Ok(cmd)
}

fn required(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{flag} needs a source name"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let command = parse_command(std::env::args().skip(1))?;
    let cfg = load_monitor_config_default()?;
    let context = load_company_context();
    let ai = AiConfig::load_or_disabled(DEFAULT_AI_CONFIG_PATH);

    let registry_path = cfg.state_dir.join(DEFAULT_REGISTRY_FILE);
    let mut registry = SourceRegistry::load(&registry_path)
        .with_context(|| format!("loading {}", registry_path.display()))?;

    let fetcher = Arc::new(HttpFetcher::new(&cfg.user_agent, cfg.fetch_timeout())?);
    let search: Option<Arc<dyn SearchProvider>> =
        match DuckDuckGoSearch::new(&cfg.user_agent, cfg.fetch_timeout()) {
            Ok(s) => Some(Arc::new(s)),
            Err(e) => {
                tracing::warn!(error = ?e, "search fallback unavailable");
                None
            }
        };
    let client = build_client_from_config(
        &ai,
        cfg.state_dir.join("reasoning_cache"),
        cfg.analysis_timeout(),
    );
    let analyzer = AnalysisEngine::new(client, cfg.analysis_timeout(), cfg.max_in_flight_analyses)
        .with_keywords(load_keywords_or_default(Path::new(DEFAULT_KEYWORDS_PATH)));
    let store = Arc::new(FileStore::new(&cfg.state_dir));
    let mut engine = MonitoringEngine::new(
        cfg.clone(),
        Extractor::new(fetcher, search),
        analyzer,
        store,
    )?;

    match command {
        Command::Once => {
            let report = engine.run_cycle(&mut registry, &context).await;
            registry.save(&registry_path)?;
            print_json(&report)?;
        }
        Command::Check(name) => {
            let (outcome, finding) = engine.check_source(&mut registry, &name, &context).await?;
            registry.save(&registry_path)?;
            print_json(&serde_json::json!({ "outcome": outcome, "finding": finding }))?;
        }
        Command::List => print_json(&registry.list())?,
        Command::Trend(name) => print_json(&engine.trend(&name))?,
        Command::Compare(a, b) => print_json(&engine.compare(&a, &b)?)?,
        Command::ResetCache(name) => {
            let cleared = engine.reset_cache(name.as_deref())?;
            println!("cleared {cleared} fingerprint set(s)");
        }
        Command::Run => {
            if registry.enabled().is_empty() {
                tracing::warn!(path = %registry_path.display(), "no enabled sources registered");
            }
            let sched = SchedulerCfg {
                interval: cfg.check_interval(),
                registry_path: Some(registry_path),
                max_cycles: None,
            };
            let handle = spawn_scheduler(engine, registry, context, sched, |report| {
                for f in &report.findings {
                    tracing::info!(
                        source = %f.source.name,
                        impact = %f.analysis.impact,
                        summary = %f.analysis.summary,
                        "new finding"
                    );
                }
            });
            tokio::select! {
                res = handle => res.context("scheduler task")?,
                _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
            }
        }
    }
    Ok(())
}
