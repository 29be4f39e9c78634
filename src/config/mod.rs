// src/config/mod.rs
pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::CompanyContext;

pub const ENV_MONITOR_CONFIG: &str = "INTEL_MONITOR_CONFIG";
pub const ENV_COMPANY_CONTEXT: &str = "INTEL_COMPANY_CONTEXT";
pub const DEFAULT_COMPANY_CONTEXT_PATH: &str = "config/company.json";

/// Runtime knobs for one monitor process. Read once, treated as a snapshot per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum delay between two successive sources in a cycle.
    pub rate_limit_secs: u64,
    pub fingerprint_cap: usize,
    pub history_cap: usize,
    pub max_updates_per_finding: usize,
    pub fetch_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    pub max_in_flight_analyses: usize,
    pub min_trend_entries: usize,
    pub state_dir: PathBuf,
    pub check_interval_hours: u64,
    pub user_agent: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 2,
            fingerprint_cap: 100,
            history_cap: 50,
            max_updates_per_finding: 5,
            fetch_timeout_secs: 15,
            analysis_timeout_secs: 30,
            max_in_flight_analyses: 2,
            min_trend_entries: 3,
            state_dir: PathBuf::from("state"),
            check_interval_hours: 24,
            user_agent: "intel-monitor/0.1".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours.max(1) * 3600)
    }

    /// Caps of zero would make every insert an eviction; keep at least one slot.
    fn sanitized(mut self) -> Self {
        self.fingerprint_cap = self.fingerprint_cap.max(1);
        self.history_cap = self.history_cap.max(1);
        self.max_updates_per_finding = self.max_updates_per_finding.max(1);
        self.max_in_flight_analyses = self.max_in_flight_analyses.max(1);
        self.min_trend_entries = self.min_trend_entries.max(3);
        self
    }
}

/// Load monitor config from an explicit path. Supports TOML or JSON.
pub fn load_monitor_config_from(path: &Path) -> Result<MonitorConfig> {
    let cfg: MonitorConfig = load_file(path)?;
    Ok(cfg.sanitized())
}

/// Load monitor config using env var + fallbacks:
/// 1) $INTEL_MONITOR_CONFIG
/// 2) config/monitor.toml
/// 3) config/monitor.json
/// 4) built-in defaults
pub fn load_monitor_config_default() -> Result<MonitorConfig> {
    if let Ok(p) = std::env::var(ENV_MONITOR_CONFIG) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_monitor_config_from(&pb);
        }
        return Err(anyhow!("{ENV_MONITOR_CONFIG} points to non-existent path"));
    }
    for candidate in ["config/monitor.toml", "config/monitor.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_monitor_config_from(&p);
        }
    }
    Ok(MonitorConfig::default())
}

/// Company context from $INTEL_COMPANY_CONTEXT or `config/company.json`.
/// Absence or a broken file yields the defaults; analysis just gets less specific.
pub fn load_company_context() -> CompanyContext {
    let path = std::env::var(ENV_COMPANY_CONTEXT)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_COMPANY_CONTEXT_PATH));
    if !path.exists() {
        return CompanyContext::default();
    }
    match load_file::<CompanyContext>(&path) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = ?e, path = %path.display(), "company context unreadable, using defaults");
            CompanyContext::default()
        }
    }
}

pub(crate) fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, &ext).with_context(|| format!("parsing {}", path.display()))
}

fn parse_config<T: DeserializeOwned>(s: &str, hint_ext: &str) -> Result<T> {
    if hint_ext == "toml" {
        return Ok(toml::from_str(s)?);
    }
    // JSON first, then TOML for extension-less files.
    match serde_json::from_str(s) {
        Ok(v) => Ok(v),
        Err(json_err) => toml::from_str(s).map_err(|_| anyhow!(json_err)),
    }
}
