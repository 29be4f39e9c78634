//! trend.rs: bounded per-source analysis history and the statistics derived from it.
//!
//! Tallies (impact counts, feature mentions) are accumulated on `record` and are
//! not decremented when old entries fall out of the window, so they describe the
//! whole observed lifetime while the entry list only covers the last `cap` records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;

use crate::model::{source_key, Analysis, Finding, Impact};

pub const DEFAULT_HISTORY_CAP: usize = 50;
pub const DEFAULT_MIN_TREND_ENTRIES: usize = 3;
/// Entries considered "recent" for focus keywords and activity.
pub const RECENT_WINDOW: usize = 10;
const TOP_N: usize = 5;
/// Mean impact difference (on the 1..=4 scale) needed to call a direction.
const DIRECTION_THRESHOLD: f32 = 0.25;
const MIN_TERM_CHARS: usize = 5;
const STOP_TERMS: &[&str] = &[
    "feature", "features", "update", "updates", "release", "releases", "support", "about",
    "their", "there", "these", "those", "which", "other", "using", "where", "while",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrendError {
    #[error("no historical data for '{0}'")]
    NoHistory(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    pub timestamp: DateTime<Utc>,
    pub impact: Impact,
    pub threat_level: Impact,
    pub summary: String,
    pub key_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendHistory {
    cap: usize,
    entries: VecDeque<TrendEntry>,
    impact_counts: BTreeMap<Impact, u64>,
    feature_mentions: HashMap<String, u64>,
}

impl TrendHistory {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: VecDeque::new(),
            impact_counts: BTreeMap::new(),
            feature_mentions: HashMap::new(),
        }
    }

    fn push(&mut self, entry: TrendEntry) {
        *self.impact_counts.entry(entry.impact).or_insert(0) += 1;
        for feature in &entry.key_features {
            for term in feature_terms(feature) {
                *self.feature_mentions.entry(term).or_insert(0) += 1;
            }
        }
        self.entries.push_back(entry);
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrendEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn impact_counts(&self) -> &BTreeMap<Impact, u64> {
        &self.impact_counts
    }

    pub fn feature_mentions(&self) -> &HashMap<String, u64> {
        &self.feature_mentions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Stable,
    Decreasing,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub source: String,
    pub direction: Direction,
    /// Mean impact score (1..=4) over the retained history.
    pub average_impact: Option<f32>,
    pub top_features: Vec<(String, u64)>,
    pub recent_focus: Vec<(String, u64)>,
    pub total_entries: usize,
    pub recent_activity: usize,
    pub impact_distribution: BTreeMap<Impact, u64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub first: Trend,
    pub second: Trend,
    /// `None` on a tie.
    pub more_active: Option<String>,
    pub higher_impact: Option<String>,
    /// Set when exactly one side is trending upward.
    pub momentum: Option<String>,
}

/// Per-source histories; one writer (the monitoring engine) at a time.
#[derive(Debug, Clone)]
pub struct TrendAccumulator {
    cap: usize,
    min_entries: usize,
    histories: HashMap<String, TrendHistory>,
}

impl Default for TrendAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP, DEFAULT_MIN_TREND_ENTRIES)
    }
}

impl TrendAccumulator {
    pub fn new(cap: usize, min_entries: usize) -> Self {
        Self {
            cap: cap.max(1),
            min_entries: min_entries.max(DEFAULT_MIN_TREND_ENTRIES),
            histories: HashMap::new(),
        }
    }

    pub fn from_histories(
        cap: usize,
        min_entries: usize,
        histories: HashMap<String, TrendHistory>,
    ) -> Self {
        let mut acc = Self::new(cap, min_entries);
        for (k, mut h) in histories {
            h.cap = acc.cap;
            h.enforce_cap();
            acc.histories.insert(source_key(&k), h);
        }
        acc
    }

    pub fn record(&mut self, source_id: &str, analysis: &Analysis) -> &TrendHistory {
        self.record_at(source_id, analysis, Utc::now())
    }

    pub fn record_at(
        &mut self,
        source_id: &str,
        analysis: &Analysis,
        at: DateTime<Utc>,
    ) -> &TrendHistory {
        let cap = self.cap;
        let history = self
            .histories
            .entry(source_key(source_id))
            .or_insert_with(|| TrendHistory::with_cap(cap));
        history.push(TrendEntry {
            timestamp: at,
            impact: analysis.impact,
            threat_level: analysis.threat_level,
            summary: analysis.summary.clone(),
            key_features: analysis.key_features.clone(),
        });
        tracing::debug!(
            target: "trend",
            source = %source_id,
            entries = history.len(),
            impact = %analysis.impact,
            "trend entry recorded"
        );
        history
    }

    pub fn record_finding(&mut self, finding: &Finding) -> &TrendHistory {
        self.record(&finding.source.name, &finding.analysis)
    }

    pub fn history(&self, source_id: &str) -> Option<&TrendHistory> {
        self.histories.get(&source_key(source_id))
    }

    pub fn compute_trend(&self, source_id: &str) -> Trend {
        let empty = TrendHistory::with_cap(self.cap);
        let h = self.history(source_id).unwrap_or(&empty);
        let scores: Vec<f32> = h.entries.iter().map(|e| e.impact.score() as f32).collect();

        let recent: Vec<&TrendEntry> = h
            .entries
            .iter()
            .skip(h.len().saturating_sub(RECENT_WINDOW))
            .collect();
        let mut focus: HashMap<String, u64> = HashMap::new();
        for e in &recent {
            for f in &e.key_features {
                for term in feature_terms(f) {
                    *focus.entry(term).or_insert(0) += 1;
                }
            }
        }

        Trend {
            source: source_id.to_string(),
            direction: direction_of(&scores, self.min_entries),
            average_impact: mean(&scores),
            top_features: top_n(&h.feature_mentions, TOP_N),
            recent_focus: top_n(&focus, TOP_N),
            total_entries: h.len(),
            recent_activity: recent.len(),
            impact_distribution: h.impact_counts.clone(),
            first_seen: h.entries.front().map(|e| e.timestamp),
            last_seen: h.entries.back().map(|e| e.timestamp),
        }
    }

    pub fn compare(&self, a: &str, b: &str) -> Result<Comparison, TrendError> {
        for id in [a, b] {
            if self.history(id).map_or(true, TrendHistory::is_empty) {
                return Err(TrendError::NoHistory(id.to_string()));
            }
        }
        let first = self.compute_trend(a);
        let second = self.compute_trend(b);

        let more_active = match first.total_entries.cmp(&second.total_entries) {
            std::cmp::Ordering::Greater => Some(a.to_string()),
            std::cmp::Ordering::Less => Some(b.to_string()),
            std::cmp::Ordering::Equal => None,
        };
        let (ia, ib) = (
            first.average_impact.unwrap_or(0.0),
            second.average_impact.unwrap_or(0.0),
        );
        let higher_impact = if (ia - ib).abs() < f32::EPSILON {
            None
        } else if ia > ib {
            Some(a.to_string())
        } else {
            Some(b.to_string())
        };
        let momentum = match (first.direction, second.direction) {
            (Direction::Increasing, d) if d != Direction::Increasing => Some(a.to_string()),
            (d, Direction::Increasing) if d != Direction::Increasing => Some(b.to_string()),
            _ => None,
        };

        Ok(Comparison {
            first,
            second,
            more_active,
            higher_impact,
            momentum,
        })
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

/// Recent third vs the earlier two thirds.
fn direction_of(scores: &[f32], min_entries: usize) -> Direction {
    if scores.len() < min_entries {
        return Direction::InsufficientData;
    }
    let recent_len = (scores.len() / 3).max(1);
    let split = scores.len() - recent_len;
    let (earlier, recent) = scores.split_at(split);
    match (mean(recent), mean(earlier)) {
        (Some(r), Some(e)) if r - e > DIRECTION_THRESHOLD => Direction::Increasing,
        (Some(r), Some(e)) if e - r > DIRECTION_THRESHOLD => Direction::Decreasing,
        _ => Direction::Stable,
    }
}

fn mean(xs: &[f32]) -> Option<f32> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f32>() / xs.len() as f32)
    }
}

/// Distinct case-folded words of one feature name, minus short/stop words.
fn feature_terms(feature: &str) -> HashSet<String> {
    feature
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS && !STOP_TERMS.contains(&w.as_str()))
        .collect()
}

fn top_n(counts: &HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut v: Vec<(String, u64)> = counts.iter().map(|(k, c)| (k.clone(), *c)).collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.truncate(n);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnalysisMethod;

    fn analysis(impact: Impact, features: &[&str]) -> Analysis {
        Analysis {
            summary: format!("{impact} change"),
            key_features: features.iter().map(|s| s.to_string()).collect(),
            impact,
            recommended_action: "watch".into(),
            threat_level: Impact::Low,
            opportunities: vec![],
            strategic_implication: None,
            confidence: 0.4,
            method: AnalysisMethod::RuleBased,
        }
    }

    #[test]
    fn terms_are_case_folded_and_filtered() {
        let t = feature_terms("Realtime Collaboration update, AI-powered SEARCH");
        assert!(t.contains("realtime"));
        assert!(t.contains("collaboration"));
        assert!(t.contains("search"));
        assert!(t.contains("powered"));
        assert!(!t.contains("update"));
        assert!(!t.contains("ai"));
    }

    #[test]
    fn history_is_capped_but_tallies_keep_counting() {
        let mut acc = TrendAccumulator::new(3, 3);
        for _ in 0..5 {
            acc.record("Acme", &analysis(Impact::High, &["Workflow automation"]));
        }
        let h = acc.history("acme").unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.impact_counts()[&Impact::High], 5);
        assert_eq!(h.feature_mentions()["workflow"], 5);
    }

    #[test]
    fn direction_needs_minimum_entries() {
        let mut acc = TrendAccumulator::default();
        assert_eq!(acc.compute_trend("x").direction, Direction::InsufficientData);
        acc.record("x", &analysis(Impact::Low, &[]));
        acc.record("x", &analysis(Impact::Critical, &[]));
        assert_eq!(acc.compute_trend("x").direction, Direction::InsufficientData);
        acc.record("x", &analysis(Impact::Critical, &[]));
        assert_ne!(acc.compute_trend("x").direction, Direction::InsufficientData);
    }

    #[test]
    fn direction_compares_recent_third() {
        let mut acc = TrendAccumulator::default();
        for i in [Impact::Low, Impact::Low, Impact::Low, Impact::Low, Impact::High, Impact::Critical] {
            acc.record("up", &analysis(i, &[]));
        }
        assert_eq!(acc.compute_trend("up").direction, Direction::Increasing);

        for i in [Impact::Critical, Impact::High, Impact::High, Impact::Low] {
            acc.record("down", &analysis(i, &[]));
        }
        assert_eq!(acc.compute_trend("down").direction, Direction::Decreasing);

        for _ in 0..4 {
            acc.record("flat", &analysis(Impact::Medium, &[]));
        }
        let t = acc.compute_trend("flat");
        assert_eq!(t.direction, Direction::Stable);
        assert_eq!(t.average_impact, Some(2.0));
    }

    #[test]
    fn compare_requires_both_histories() {
        let mut acc = TrendAccumulator::default();
        acc.record("Acme", &analysis(Impact::High, &["Billing portal"]));
        assert_eq!(
            acc.compare("Acme", "Beta").unwrap_err(),
            TrendError::NoHistory("Beta".into())
        );
        assert!(acc.compare("Nobody", "Acme").is_err());

        acc.record("Beta", &analysis(Impact::Low, &[]));
        acc.record("Beta", &analysis(Impact::Low, &[]));
        let cmp = acc.compare("Acme", "Beta").unwrap();
        assert_eq!(cmp.more_active.as_deref(), Some("Beta"));
        assert_eq!(cmp.higher_impact.as_deref(), Some("Acme"));
        assert_eq!(cmp.momentum, None);
    }

    #[test]
    fn history_survives_json() {
        let mut acc = TrendAccumulator::default();
        acc.record("Acme", &analysis(Impact::Critical, &["Enterprise SSO"]));
        let h = acc.history("Acme").unwrap().clone();
        let json = serde_json::to_string(&h).unwrap();
        let back: TrendHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
