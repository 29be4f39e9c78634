//! Web-search fallback for sources whose feed and page yield nothing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::model::{truncate_chars, OriginKind, Source, Update};

pub const DEFAULT_RESULT_LIMIT: usize = 5;
const DDG_ENDPOINT: &str = "https://api.duckduckgo.com/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
    fn name(&self) -> &'static str;
}

/// "{name} {category} new features {Month Year}"; an unknown category is omitted.
pub fn build_query(source: &Source, now: DateTime<Utc>) -> String {
    let category = source.category.trim();
    let mut q = source.name.trim().to_string();
    if !category.is_empty() && !category.eq_ignore_ascii_case("unknown") {
        q.push(' ');
        q.push_str(category);
    }
    format!("{q} new features {}", now.format("%B %Y"))
}

pub fn hits_to_updates(hits: Vec<SearchHit>, fallback_url: &str, at: DateTime<Utc>) -> Vec<Update> {
    hits.into_iter()
        .filter_map(|h| {
            let snippet = super::clean_text(&h.snippet);
            let mut title = super::clean_text(&h.title);
            if title.is_empty() {
                title = snippet.split(" - ").next().unwrap_or_default().trim().to_string();
            }
            if title.is_empty() {
                return None;
            }
            let url = if h.url.trim().is_empty() {
                fallback_url.to_string()
            } else {
                h.url
            };
            Some(Update::new(
                truncate_chars(&title, 200),
                snippet,
                OriginKind::Search,
                url,
                None,
                at,
            ))
        })
        .collect()
}

/// DuckDuckGo instant-answer API: the abstract plus related topics.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
struct DdgResponse {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "Abstract", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related: Vec<DdgTopic>,
}

#[derive(Debug, Default, Deserialize)]
struct DdgTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
    /// Grouped topics nest one level.
    #[serde(rename = "Topics", default)]
    topics: Vec<DdgTopic>,
}

impl DuckDuckGoSearch {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()
            .context("building search client")?;
        Ok(Self {
            client,
            endpoint: DDG_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn hits_from_response(resp: DdgResponse, limit: usize) -> Vec<SearchHit> {
    let mut out = Vec::new();
    if !resp.abstract_text.trim().is_empty() {
        out.push(SearchHit {
            title: resp.heading.clone(),
            snippet: resp.abstract_text.clone(),
            url: resp.abstract_url.clone(),
        });
    }
    let topics = resp
        .related
        .into_iter()
        .flat_map(|t| if t.topics.is_empty() { vec![t] } else { t.topics });
    for t in topics {
        if t.text.trim().is_empty() {
            continue;
        }
        let title = t.text.split(" - ").next().unwrap_or_default().to_string();
        out.push(SearchHit {
            title,
            snippet: t.text,
            url: t.first_url,
        });
    }
    out.truncate(limit);
    out
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .context("search request")?
            .error_for_status()
            .context("search status")?;
        // The API answers with a JS content type; decode the body ourselves.
        let body = resp.text().await.context("search body")?;
        let parsed: DdgResponse = serde_json::from_str(&body).context("search json")?;
        let hits = hits_from_response(parsed, limit);
        tracing::debug!(target: "extract", query, hits = hits.len(), "search results");
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "duckduckgo"
    }
}
