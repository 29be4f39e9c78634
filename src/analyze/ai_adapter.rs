//! Reasoning-service adapter: provider abstraction + file cache + daily limit.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ai::AiConfig;
use crate::fingerprint::short_hash;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Request sent to a reasoning provider: a system instruction and the user payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("reasoning disabled")]
    Disabled,
    #[error("daily limit of {0} calls reached")]
    LimitReached(u32),
    #[error("transport: {0}")]
    Transport(String),
    #[error("service returned status {0}")]
    Status(u16),
    #[error("empty response")]
    Empty,
}

pub type ReasoningFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ReasoningError>> + Send + 'a>>;

/// Trait object used by the analysis engine. Returns the raw response text;
/// validation happens in the engine.
pub trait ReasoningClient: Send + Sync {
    fn complete<'a>(&'a self, req: &'a ReasoningRequest) -> ReasoningFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynReasoningClient = Arc<dyn ReasoningClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if the config is not usable (disabled or no key), returns a disabled client.
/// * Else builds the real provider (OpenAI) wrapped with caching + daily limit.
pub fn build_client_from_config(
    config: &AiConfig,
    cache_dir: PathBuf,
    timeout: Duration,
) -> DynReasoningClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        let client = CachingClient::new(MockProvider::default(), cache_dir, config.daily_limit)
            .with_acceptance(is_valid_analysis);
        return Arc::new(client);
    }

    if !config.is_usable() {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(&config.api_key, &config.model, timeout) {
            Ok(provider) => Arc::new(
                CachingClient::new(provider, cache_dir, config.daily_limit)
                    .with_acceptance(is_valid_analysis),
            ),
            Err(e) => {
                tracing::warn!(target: "analyze", error = ?e, "reasoning client unavailable");
                Arc::new(DisabledClient)
            }
        },
        _ => Arc::new(DisabledClient),
    }
}

fn is_valid_analysis(raw: &str) -> bool {
    super::validate::parse_analysis(raw).is_ok()
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so the same
/// caching wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, req: &'a ReasoningRequest) -> ReasoningFuture<'a>;
    fn name(&self) -> &'static str;
}

/// OpenAI provider (Chat Completions API, JSON response format).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("intel-monitor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ReasoningError::Disabled);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let body = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &req.system,
                    },
                    Msg {
                        role: "user",
                        content: &req.user,
                    },
                ],
                temperature: 0.3,
                max_tokens: 900,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ReasoningError::Transport(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(ReasoningError::Status(resp.status().as_u16()));
            }
            let parsed: Resp = resp
                .json()
                .await
                .map_err(|e| ReasoningError::Transport(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or(ReasoningError::Empty)
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Always `Disabled`; used when reasoning is not configured.
pub struct DisabledClient;

impl ReasoningClient for DisabledClient {
    fn complete<'a>(&'a self, _req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        Box::pin(async { Err(ReasoningError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Canned provider for local runs (`AI_TEST_MODE=mock`).
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            fixed: r#"{"summary":"Routine product activity (mock).","key_features":["mock feature"],"impact":"Medium","recommended_action":"Keep monitoring.","threat_level":"Low","opportunities":[],"confidence":0.8}"#
                .to_string(),
        }
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, _req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Cached responses kept on disk before the oldest are pruned.
pub const MAX_CACHE_ENTRIES: usize = 500;

/// Counter state is guarded by a `Mutex`; the cache directory is best-effort.
/// Only responses passing `accept` are cached; rejected ones still count
/// against the daily limit.
pub struct CachingClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    max_entries: usize,
    accept: fn(&str) -> bool,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> CachingClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        let _ = fs::create_dir_all(&cache_dir); // best-effort
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            max_entries: MAX_CACHE_ENTRIES,
            accept: |_| true,
            counter,
        }
    }

    pub fn with_acceptance(mut self, accept: fn(&str) -> bool) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Real calls made today.
    pub fn calls_today(&self) -> u32 {
        let g = lock(&self.counter);
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }

    async fn complete_impl(&self, req: &ReasoningRequest) -> Result<String, ReasoningError> {
        let key = cache_key(req);

        // 1) Cache hits are free.
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            if (self.accept)(&hit.response) {
                tracing::debug!(target: "analyze", key = %key, "reasoning cache hit");
                return Ok(hit.response);
            }
        }

        // 2) Daily limit (only real calls count).
        {
            let mut g = lock(&self.counter);
            if g.is_expired() {
                g.reset_to_today();
                let _ = save_daily_counter(&self.cache_dir, &g);
            }
            if g.count >= self.daily_limit_max {
                return Err(ReasoningError::LimitReached(self.daily_limit_max));
            }
        }

        // 3) Real call.
        let fresh = self.inner.fetch(req).await?;
        {
            let mut g = lock(&self.counter);
            g.count = g.count.saturating_add(1);
            let _ = save_daily_counter(&self.cache_dir, &g);
        }

        // 4) Cache only what the caller can use.
        if (self.accept)(&fresh) {
            let cached = CachedResponse {
                response: fresh.clone(),
            };
            if write_cache_file(&self.cache_dir, &key, &cached).is_ok() {
                if let Err(e) = prune_cache(&self.cache_dir, self.max_entries) {
                    tracing::debug!(target: "analyze", error = %e, "reasoning cache prune failed");
                }
            }
        } else {
            tracing::debug!(target: "analyze", key = %key, "response rejected, not cached");
        }
        Ok(fresh)
    }
}

impl<P: Provider> ReasoningClient for CachingClient<P> {
    fn complete<'a>(&'a self, req: &'a ReasoningRequest) -> ReasoningFuture<'a> {
        Box::pin(self.complete_impl(req))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    response: String,
}

fn cache_key(req: &ReasoningRequest) -> String {
    short_hash(&format!("{}\u{1f}{}", req.system, req.user), 16)
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedResponse> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedResponse) -> io::Result<()> {
    write_atomic(&cache_path(dir, key), value)
}

/// Removes the oldest cached responses until at most `max` remain.
fn prune_cache(dir: &Path, max: usize) -> io::Result<usize> {
    let counter = counter_path(dir);
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path == counter || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        entries.push((modified, path));
    }
    if entries.len() <= max {
        return Ok(0);
    }
    entries.sort();
    let excess = entries.len() - max;
    for (_, path) in &entries[..excess] {
        fs::remove_file(path)?;
    }
    Ok(excess)
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}
impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}
impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

/// UTC calendar day, e.g. "2025-03-14".
fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    write_atomic(&counter_path(dir), dc)
}
