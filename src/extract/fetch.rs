use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::time::Duration;

/// Retrieves a document body by URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// reqwest-backed fetcher with a fixed user agent and request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "extract", error = ?e, url, "http error");
                counter!("extract_fetch_errors_total").increment(1);
                return Err(e).with_context(|| format!("GET {url}"));
            }
        };
        let resp = resp
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.text()
            .await
            .with_context(|| format!("reading body of {url}"))
    }
}

/// Serves canned bodies keyed by URL; unknown URLs error. For fixtures and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for {url}"))
    }
}
