//! Rule-based fallback analysis (no external dependency, fully deterministic).
//!
//! Keyword categories are a small JSON DSL, optionally loaded from
//! `config/keywords.json`:
//! - `level`:   impact label the category pushes toward (informational)
//! - `weight`:  signed score added when ANY phrase of the category appears
//! - `phrases`: case-insensitive, matched at a word start ("launch" hits "launched")
//!
//! Per update, the summed weight maps to an impact; the batch takes the highest.

use serde::Deserialize;
use std::{fs, io, path::Path};

use crate::model::{
    Analysis, AnalysisMethod, CompanyContext, Impact, Priority, Source, Update,
};

pub const DEFAULT_KEYWORDS_PATH: &str = "config/keywords.json";

/// Fallback confidence stays within [BASE, MAX], below the primary-path floor.
pub const FALLBACK_CONFIDENCE_BASE: f32 = 0.35;
pub const FALLBACK_CONFIDENCE_MAX: f32 = 0.45;

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordSet {
    pub categories: Vec<KeywordCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordCategory {
    pub level: Impact,
    pub weight: i32,
    pub phrases: Vec<String>,
}

impl Default for KeywordSet {
    fn default() -> Self {
        fn cat(level: Impact, weight: i32, phrases: &[&str]) -> KeywordCategory {
            KeywordCategory {
                level,
                weight,
                phrases: phrases.iter().map(|p| p.to_string()).collect(),
            }
        }
        Self {
            categories: vec![
                cat(
                    Impact::Critical,
                    4,
                    &[
                        "acquisition",
                        "acquired",
                        "acquires",
                        "merger",
                        "funding",
                        "series a",
                        "series b",
                        "series c",
                        "million",
                        "billion",
                        "ipo",
                        "partnership with",
                    ],
                ),
                cat(
                    Impact::High,
                    2,
                    &[
                        "launch",
                        "new product",
                        "major",
                        "enterprise",
                        "pricing",
                        "price",
                        "discount",
                        "free tier",
                        "general availability",
                    ],
                ),
                cat(
                    Impact::Medium,
                    1,
                    &[
                        "feature",
                        "update",
                        "release",
                        "beta",
                        "preview",
                        "integration",
                        "api",
                    ],
                ),
                cat(
                    Impact::Low,
                    -1,
                    &[
                        "bug fix",
                        "bugfix",
                        "fix",
                        "patch",
                        "maintenance",
                        "minor",
                        "improvement",
                        "typo",
                    ],
                ),
            ],
        }
    }
}

pub fn load_keywords_file(path: &Path) -> io::Result<KeywordSet> {
    let bytes = fs::read(path)?;
    let set: KeywordSet = serde_json::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(set)
}

/// File override when present and valid, built-in categories otherwise.
pub fn load_keywords_or_default(path: &Path) -> KeywordSet {
    match load_keywords_file(path) {
        Ok(set) => set,
        Err(e) if e.kind() == io::ErrorKind::NotFound => KeywordSet::default(),
        Err(e) => {
            tracing::warn!(target: "analyze", error = %e, path = %path.display(), "bad keyword file, using built-in");
            KeywordSet::default()
        }
    }
}

/// Signed keyword score of one text, each category counted once.
pub fn score_text(text: &str, keywords: &KeywordSet) -> (i32, bool) {
    let text = normalize(text);
    let mut score = 0;
    let mut matched = false;
    for cat in &keywords.categories {
        if cat.phrases.iter().any(|p| contains_at_word_start(&text, p)) {
            score += cat.weight;
            matched = true;
        }
    }
    (score, matched)
}

pub fn impact_for_score(score: i32, matched: bool) -> Impact {
    match score {
        _ if !matched => Impact::Medium,
        s if s >= 4 => Impact::Critical,
        s if s >= 2 => Impact::High,
        s if s >= 1 => Impact::Medium,
        s if s <= -1 => Impact::Low,
        _ => Impact::Medium,
    }
}

/// One step below impact, shifted by source priority.
pub fn threat_for(impact: Impact, priority: Priority) -> Impact {
    let adj = match priority {
        Priority::High => 1,
        Priority::Medium => 0,
        Priority::Low => -1,
    };
    Impact::from_score(i32::from(impact.score()) - 1 + adj)
}

pub fn fallback_analysis(
    source: &Source,
    context: &CompanyContext,
    updates: &[Update],
    keywords: &KeywordSet,
) -> Analysis {
    let mut impact: Option<Impact> = None;
    let mut any_match = false;
    for u in updates {
        let (score, matched) = score_text(&format!("{} {}", u.title(), u.body()), keywords);
        any_match |= matched;
        let i = impact_for_score(score, matched);
        impact = Some(impact.map_or(i, |cur| cur.max(i)));
    }
    let impact = impact.unwrap_or_default();
    let name = source.name.as_str();
    let category = if source.category.trim().is_empty() {
        "product"
    } else {
        source.category.as_str()
    };

    let titles: Vec<String> = updates
        .iter()
        .map(|u| u.title().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let summary = if titles.is_empty() {
        format!("{name} published new updates.")
    } else {
        format!("{name} released: {}", titles.join("; "))
    };

    let recommended_action = match impact {
        Impact::Critical => format!(
            "Escalate: brief leadership on {name}'s move and prepare a competitive response."
        ),
        Impact::High => format!("Review {name}'s updates this week and assess competitive positioning."),
        Impact::Medium => format!("Review {name}'s updates and assess competitive positioning."),
        Impact::Low => format!("Note {name}'s changes; no immediate action needed."),
    };

    let opportunities = if impact >= Impact::High {
        vec![format!(
            "Differentiate {} against {name}'s {category} changes",
            context.name
        )]
    } else {
        Vec::new()
    };

    let mut confidence = FALLBACK_CONFIDENCE_BASE;
    if any_match {
        confidence += 0.05;
    }
    if updates.len() >= 3 {
        confidence += 0.05;
    }

    Analysis {
        summary,
        key_features: titles,
        impact,
        recommended_action,
        threat_level: threat_for(impact, source.priority),
        opportunities,
        strategic_implication: Some(format!(
            "{name} is actively evolving their {category} offering"
        )),
        confidence: confidence.min(FALLBACK_CONFIDENCE_MAX),
        method: AnalysisMethod::RuleBased,
    }
    .bounded()
}

// --- internals ---

fn contains_at_word_start(text: &str, pat: &str) -> bool {
    let p = normalize(pat);
    if p.is_empty() {
        return false;
    }
    text.match_indices(p.as_str()).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}
