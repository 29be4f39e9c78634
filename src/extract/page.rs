//! HTML page strategies.
//!
//! Both strategies parse synchronously from a fetched body; `scraper::Html` is
//! never held across an await.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use crate::model::{OriginKind, Update};

pub const MAX_STRUCTURED_UPDATES: usize = 20;
pub const MAX_AGGRESSIVE_UPDATES: usize = 15;

const MIN_TITLE_CHARS: usize = 5;
/// Body fragments at or below this length are navigation crumbs, not prose.
const MIN_FRAGMENT_CHARS: usize = 15;
const MAX_SCAN: usize = 50;
const SUMMARY_WORDS: usize = 15;

/// Elements dropped before any strategy looks at the page.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "iframe", "noscript", "svg", "button", "input",
    "select", "form", "aside", "template",
];
const NOISE_ROLES: &[&str] = &[
    "navigation",
    "banner",
    "complementary",
    "contentinfo",
    "dialog",
];
/// Matched against class/id tokens (split on whitespace, '-' and '_').
const NOISE_TOKENS: &[&str] = &[
    "cookie",
    "cookies",
    "consent",
    "gdpr",
    "popup",
    "modal",
    "newsletter",
    "subscribe",
    "advert",
    "advertisement",
    "ad",
    "ads",
    "sponsored",
    "promo",
    "share",
    "social",
    "chat",
    "breadcrumb",
    "breadcrumbs",
];
/// Substrings of a lowercased class/id that mark an update container.
const CONTAINER_HINTS: &[&str] = &[
    "post",
    "update",
    "release",
    "item",
    "entry",
    "card",
    "news",
    "article",
    "changelog",
    "change",
    "feature",
    "announcement",
    "blog",
    "story",
    "note",
];
const UI_WORDS: &[&str] = &[
    "click",
    "button",
    "menu",
    "toggle",
    "dropdown",
    "modal",
    "sign in",
    "log in",
    "cookie",
    "accept all",
    "javascript",
];

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static MAIN: Lazy<Selector> = Lazy::new(|| sel("main, [role=main]"));
static BODY: Lazy<Selector> = Lazy::new(|| sel("body"));
static HEADINGS: Lazy<Selector> = Lazy::new(|| sel("h1, h2, h3, h4, h5, h6"));
static SCAN_HEADINGS: Lazy<Selector> = Lazy::new(|| sel("h1, h2, h3, h4, h5"));
static TITLE_FALLBACK: Lazy<Selector> = Lazy::new(|| sel("a, strong, b"));
static TIME: Lazy<Selector> = Lazy::new(|| sel("time"));
static FRAGMENTS: Lazy<Selector> = Lazy::new(|| sel("p, li, blockquote"));
static PARAGRAPHS: Lazy<Selector> = Lazy::new(|| sel("p"));
static EMPHASIS: Lazy<Selector> = Lazy::new(|| sel("strong, b, em"));
static DIVS: Lazy<Selector> = Lazy::new(|| sel("div"));

/// Containers (`article`, `section`, or div/li with a container-like class/id).
/// Nested containers yield only the innermost ones.
pub fn structured(html: &str, page_url: &str, at: DateTime<Utc>) -> Vec<Update> {
    let doc = clean_document(html);
    let root = main_content(&doc);

    let candidates: Vec<ElementRef> = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(is_container)
        .collect();
    let ids: HashSet<_> = candidates.iter().map(|c| c.id()).collect();

    let mut out = Vec::new();
    let mut titles = HashSet::new();
    for c in &candidates {
        if out.len() >= MAX_STRUCTURED_UPDATES {
            break;
        }
        let has_inner = c.descendants().skip(1).any(|n| ids.contains(&n.id()));
        if has_inner {
            continue;
        }
        if let Some(u) = from_container(*c, page_url, at) {
            push_unique(&mut out, &mut titles, u);
        }
    }
    out
}

/// Heading scan, then emphasized paragraphs, then leaf text blocks, each
/// pass only when the previous ones found too little.
pub fn aggressive(html: &str, page_url: &str, at: DateTime<Utc>) -> Vec<Update> {
    let doc = clean_document(html);
    let root = doc.root_element();
    let mut out = Vec::new();
    let mut titles = HashSet::new();

    for h in root.select(&SCAN_HEADINGS).take(MAX_SCAN) {
        let title = text_of(h);
        if !(10..=300).contains(&title.chars().count()) || !looks_like_content(&title) {
            continue;
        }
        let body: Vec<String> = h
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take_while(|e| !is_heading(e))
            .filter(|e| matches!(e.value().name(), "p" | "div" | "span" | "ul" | "ol"))
            .map(text_of)
            .filter(|t| t.chars().count() > MIN_FRAGMENT_CHARS)
            .take(3)
            .collect();
        let u = Update::new(title, body.join(" "), OriginKind::Page, page_url, None, at);
        push_unique(&mut out, &mut titles, u);
    }

    if out.len() < 3 {
        for p in root.select(&PARAGRAPHS).take(MAX_SCAN) {
            let Some(em) = p.select(&EMPHASIS).next() else {
                continue;
            };
            let title = text_of(em);
            if !(10..=200).contains(&title.chars().count()) || !looks_like_content(&title) {
                continue;
            }
            let full = text_of(p);
            let body = full.replacen(&title, "", 1).trim().to_string();
            let u = Update::new(title, body, OriginKind::Page, page_url, None, at);
            push_unique(&mut out, &mut titles, u);
        }
    }

    if out.len() < 2 {
        for d in root.select(&DIVS).take(MAX_SCAN) {
            let has_blocks = d
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|e| matches!(e.value().name(), "div" | "section" | "article"));
            if has_blocks {
                continue;
            }
            let text = text_of(d);
            if !(20..=500).contains(&text.chars().count()) || !looks_like_content(&text) {
                continue;
            }
            let title = text
                .split_whitespace()
                .take(SUMMARY_WORDS)
                .collect::<Vec<_>>()
                .join(" ");
            let u = Update::new(title, text, OriginKind::Page, page_url, None, at);
            push_unique(&mut out, &mut titles, u);
        }
    }

    out.truncate(MAX_AGGRESSIVE_UPDATES);
    out
}

fn push_unique(out: &mut Vec<Update>, titles: &mut HashSet<String>, u: Update) {
    if titles.insert(u.title().to_lowercase()) {
        out.push(u);
    }
}

fn from_container(c: ElementRef<'_>, page_url: &str, at: DateTime<Utc>) -> Option<Update> {
    let title = c
        .select(&HEADINGS)
        .map(text_of)
        .find(|t| !t.is_empty())
        .or_else(|| {
            c.select(&TITLE_FALLBACK)
                .map(text_of)
                .find(|t| t.chars().count() >= MIN_TITLE_CHARS)
        })?;
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }

    let date = c
        .select(&TIME)
        .next()
        .map(|t| {
            t.value()
                .attr("datetime")
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| text_of(t))
        })
        .or_else(|| {
            c.descendants()
                .filter_map(ElementRef::wrap)
                .find(|e| {
                    e.value()
                        .attr("class")
                        .is_some_and(|cls| cls.to_ascii_lowercase().contains("date"))
                })
                .map(text_of)
        })
        .filter(|d| !d.is_empty());

    let mut seen = HashSet::new();
    let parts: Vec<String> = c
        .select(&FRAGMENTS)
        .map(text_of)
        .filter(|t| t.chars().count() > MIN_FRAGMENT_CHARS && *t != title)
        .filter(|t| seen.insert(t.clone()))
        .collect();
    let body = if parts.is_empty() {
        text_of(c).replacen(&title, "", 1).trim().to_string()
    } else {
        parts.join(" ")
    };

    Some(Update::new(title, body, OriginKind::Page, page_url, date, at))
}

/// Parse and detach noise subtrees.
fn clean_document(html: &str) -> Html {
    let mut doc = Html::parse_document(html);
    let doomed: Vec<_> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(is_noise)
        .map(|e| e.id())
        .collect();
    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    doc
}

fn main_content(doc: &Html) -> ElementRef<'_> {
    doc.select(&MAIN)
        .next()
        .or_else(|| doc.select(&BODY).next())
        .unwrap_or_else(|| doc.root_element())
}

fn is_noise(el: &ElementRef<'_>) -> bool {
    let v = el.value();
    let name = v.name();
    if matches!(name, "html" | "body" | "main") {
        return false;
    }
    if NOISE_TAGS.contains(&name) {
        return true;
    }
    // Page-level headers only; article headers carry titles.
    if name == "header" && !inside_content(el) {
        return true;
    }
    if v
        .attr("role")
        .is_some_and(|r| NOISE_ROLES.contains(&r.trim().to_ascii_lowercase().as_str()))
    {
        return true;
    }
    attr_tokens(v).iter().any(|t| NOISE_TOKENS.contains(&t.as_str()))
}

fn inside_content(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| matches!(a.value().name(), "article" | "section"))
}

fn is_container(el: &ElementRef<'_>) -> bool {
    let v = el.value();
    match v.name() {
        "article" | "section" => true,
        "div" | "li" => {
            let hay = [v.attr("class"), v.attr("id")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
                .to_ascii_lowercase();
            CONTAINER_HINTS.iter().any(|h| hay.contains(h))
        }
        _ => false,
    }
}

fn is_heading(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn attr_tokens(v: &Element) -> Vec<String> {
    [v.attr("class"), v.attr("id")]
        .into_iter()
        .flatten()
        .flat_map(|s| s.split(|c: char| c.is_whitespace() || c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn text_of(el: ElementRef<'_>) -> String {
    let raw = el.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rejects UI chrome and symbol soup.
fn looks_like_content(text: &str) -> bool {
    let n = text.chars().count();
    if !(MIN_TITLE_CHARS..=500).contains(&n) {
        return false;
    }
    let lower = text.to_lowercase();
    if UI_WORDS.iter().filter(|w| lower.contains(*w)).count() >= 2 {
        return false;
    }
    let wordy = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count();
    wordy as f32 / n as f32 >= 0.7
}
