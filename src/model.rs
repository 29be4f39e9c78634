//! model.rs: value types shared by the pipeline (sources, updates, analyses, findings).
//!
//! Length caps live here so every producer (feed, page, search, reasoning
//! service, rule fallback) goes through the same truncation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TITLE_MAX_CHARS: usize = 250;
pub const BODY_MAX_CHARS: usize = 1200;

pub const SUMMARY_MAX_CHARS: usize = 400;
pub const ACTION_MAX_CHARS: usize = 250;
pub const IMPLICATION_MAX_CHARS: usize = 400;
pub const FEATURE_MAX_CHARS: usize = 200;
pub const OPPORTUNITY_MAX_CHARS: usize = 250;
pub const MAX_KEY_FEATURES: usize = 5;
pub const MAX_OPPORTUNITIES: usize = 4;

/// Monitoring priority of a tracked source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Shared ordinal scale for impact and threat level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Impact {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Impact {
    pub const ALL: [Impact; 4] = [Impact::Critical, Impact::High, Impact::Medium, Impact::Low];

    /// 1 (Low) ..= 4 (Critical).
    pub fn score(self) -> u8 {
        match self {
            Impact::Low => 1,
            Impact::Medium => 2,
            Impact::High => 3,
            Impact::Critical => 4,
        }
    }

    pub fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=1 => Impact::Low,
            2 => Impact::Medium,
            3 => Impact::High,
            _ => Impact::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Impact::Low => "Low",
            Impact::Medium => "Medium",
            Impact::High => "High",
            Impact::Critical => "Critical",
        }
    }

    /// Strict label parse: only the four enumerated labels (any case) are accepted.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let t = raw.trim();
        Impact::ALL
            .into_iter()
            .find(|i| i.label().eq_ignore_ascii_case(t))
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Feed,
    Page,
    Search,
}

/// A tracked external entity (a competitor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

fn default_category() -> String {
    "Unknown".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Source {
    /// Enabled, medium priority, "Unknown" category, created now.
    pub fn new(name: impl Into<String>, page_url: Option<String>, feed_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            page_url,
            feed_url,
            category: default_category(),
            priority: Priority::default(),
            enabled: true,
            tags: Vec::new(),
            created_at: Utc::now(),
            last_checked: None,
        }
    }

    /// Case-insensitive identity used for registry lookups and state keys.
    pub fn key(&self) -> String {
        source_key(&self.name)
    }

    pub fn has_address(&self) -> bool {
        non_blank(self.page_url.as_deref()) || non_blank(self.feed_url.as_deref())
    }
}

pub fn source_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn non_blank(s: Option<&str>) -> bool {
    s.is_some_and(|v| !v.trim().is_empty())
}

/// One extracted content item. Immutable once built; fields are read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    title: String,
    body: String,
    origin: OriginKind,
    url: String,
    published: Option<String>,
    detected_at: DateTime<Utc>,
    #[serde(default)]
    impact: Impact,
}

impl Update {
    /// Builds an update, applying the title/body caps. An empty body falls back to the title.
    pub fn new(
        title: impl AsRef<str>,
        body: impl AsRef<str>,
        origin: OriginKind,
        url: impl Into<String>,
        published: Option<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let title = truncate_chars(title.as_ref().trim(), TITLE_MAX_CHARS);
        let body = body.as_ref().trim();
        let body = if body.is_empty() {
            title.clone()
        } else {
            truncate_chars(body, BODY_MAX_CHARS)
        };
        Self {
            title,
            body,
            origin,
            url: url.into(),
            published: published.filter(|p| !p.trim().is_empty()),
            detected_at,
            impact: Impact::default(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn body(&self) -> &str {
        &self.body
    }
    pub fn origin(&self) -> OriginKind {
        self.origin
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn published(&self) -> Option<&str> {
        self.published.as_deref()
    }
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
    pub fn impact(&self) -> Impact {
        self.impact
    }

    /// Copy of this update carrying the analysed impact.
    pub fn with_impact(&self, impact: Impact) -> Self {
        Self {
            impact,
            ..self.clone()
        }
    }
}

/// Which analysis path produced an `Analysis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Reasoning,
    #[default]
    RuleBased,
}

/// Strategic assessment of one batch of new updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub key_features: Vec<String>,
    pub impact: Impact,
    pub recommended_action: String,
    pub threat_level: Impact,
    pub opportunities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategic_implication: Option<String>,
    /// In [0,1]. Reasoning results report at least `PRIMARY_CONFIDENCE_FLOOR`
    /// (a lower value from the service is raised to it); rule-based results
    /// stay at or below 0.45, so the two never overlap.
    pub confidence: f32,
    #[serde(default)]
    pub method: AnalysisMethod,
}

impl Analysis {
    /// Enforces every length/cardinality cap and clamps confidence into [0,1].
    pub fn bounded(mut self) -> Self {
        self.summary = truncate_chars(&self.summary, SUMMARY_MAX_CHARS);
        self.recommended_action = truncate_chars(&self.recommended_action, ACTION_MAX_CHARS);
        self.key_features = cap_list(self.key_features, MAX_KEY_FEATURES, FEATURE_MAX_CHARS);
        self.opportunities = cap_list(self.opportunities, MAX_OPPORTUNITIES, OPPORTUNITY_MAX_CHARS);
        self.strategic_implication = self
            .strategic_implication
            .map(|s| truncate_chars(&s, IMPLICATION_MAX_CHARS))
            .filter(|s| !s.is_empty());
        self.confidence = clamp01(self.confidence);
        self
    }
}

fn cap_list(items: Vec<String>, max_items: usize, max_chars: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| truncate_chars(s.trim(), max_chars))
        .filter(|s| !s.is_empty())
        .take(max_items)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompanyStage {
    #[default]
    Startup,
    Growth,
    Established,
}

/// The consuming business. Pure input to the analysis engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyContext {
    pub name: String,
    pub product: Option<String>,
    pub industry: String,
    pub target_market: String,
    pub features: Vec<String>,
    pub differentiation: Option<String>,
    pub current_focus: Option<String>,
    pub stage: CompanyStage,
    pub strategic_goals: Vec<String>,
}

impl Default for CompanyContext {
    fn default() -> Self {
        Self {
            name: "Your Company".to_string(),
            product: None,
            industry: "Technology".to_string(),
            target_market: "General".to_string(),
            features: Vec::new(),
            differentiation: None,
            current_focus: None,
            stage: CompanyStage::Startup,
            strategic_goals: Vec::new(),
        }
    }
}

/// Per-cycle, per-source output. Only constructible with an `Analysis` in hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub source: Source,
    pub updates: Vec<Update>,
    pub analysis: Analysis,
}

impl Finding {
    /// Updates are stamped with the analysed impact.
    pub fn new(source: Source, updates: &[Update], analysis: Analysis) -> Self {
        let updates = updates.iter().map(|u| u.with_impact(analysis.impact)).collect();
        Self {
            source,
            updates,
            analysis,
        }
    }
}

/// Char-boundary safe truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub(crate) fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_caps_title_and_body() {
        let long_title = "t".repeat(600);
        let long_body = "b".repeat(5000);
        let u = Update::new(&long_title, &long_body, OriginKind::Page, "https://x.test", None, Utc::now());
        assert_eq!(u.title().chars().count(), TITLE_MAX_CHARS);
        assert_eq!(u.body().chars().count(), BODY_MAX_CHARS);
        assert_eq!(u.impact(), Impact::Medium);
    }

    #[test]
    fn empty_body_falls_back_to_title() {
        let u = Update::new("Launch day", "   ", OriginKind::Feed, "", None, Utc::now());
        assert_eq!(u.body(), "Launch day");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "žluťoučký kůň".repeat(50);
        let t = truncate_chars(&s, 7);
        assert_eq!(t, "žluťouč");
    }

    #[test]
    fn impact_label_parse_is_strict() {
        assert_eq!(Impact::parse_label("critical"), Some(Impact::Critical));
        assert_eq!(Impact::parse_label(" High "), Some(Impact::High));
        assert_eq!(Impact::parse_label("Severe"), None);
        assert_eq!(Impact::parse_label(""), None);
    }

    #[test]
    fn impact_serializes_as_label() {
        let v = serde_json::to_value(Impact::Critical).unwrap();
        assert_eq!(v, serde_json::json!("Critical"));
        let o = serde_json::to_value(OriginKind::Search).unwrap();
        assert_eq!(o, serde_json::json!("search"));
    }

    #[test]
    fn bounded_analysis_enforces_caps() {
        let a = Analysis {
            summary: "s".repeat(1000),
            key_features: (0..9).map(|i| format!("feature {i}")).collect(),
            impact: Impact::High,
            recommended_action: "a".repeat(1000),
            threat_level: Impact::Low,
            opportunities: (0..9).map(|i| format!("opp {i}")).collect(),
            strategic_implication: Some("i".repeat(1000)),
            confidence: 3.0,
            method: AnalysisMethod::Reasoning,
        }
        .bounded();
        assert_eq!(a.summary.chars().count(), SUMMARY_MAX_CHARS);
        assert_eq!(a.recommended_action.chars().count(), ACTION_MAX_CHARS);
        assert_eq!(a.key_features.len(), MAX_KEY_FEATURES);
        assert_eq!(a.opportunities.len(), MAX_OPPORTUNITIES);
        assert_eq!(
            a.strategic_implication.as_deref().map(|s| s.chars().count()),
            Some(IMPLICATION_MAX_CHARS)
        );
        assert_eq!(a.confidence, 1.0);
    }

    #[test]
    fn finding_stamps_impact_on_updates() {
        let src = Source {
            name: "Acme".into(),
            page_url: Some("https://acme.test".into()),
            feed_url: None,
            category: "CRM".into(),
            priority: Priority::High,
            enabled: true,
            tags: vec![],
            created_at: Utc::now(),
            last_checked: None,
        };
        let u = Update::new("Pricing change", "New tiers", OriginKind::Page, "https://acme.test", None, Utc::now());
        let a = Analysis {
            summary: "x".into(),
            key_features: vec![],
            impact: Impact::Critical,
            recommended_action: "y".into(),
            threat_level: Impact::High,
            opportunities: vec![],
            strategic_implication: None,
            confidence: 0.4,
            method: AnalysisMethod::RuleBased,
        };
        let f = Finding::new(src, &[u], a);
        assert_eq!(f.updates[0].impact(), Impact::Critical);
    }
}
