//! RSS 2.0 and Atom parsing into update candidates.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use super::clean_text;
use crate::model::{truncate_chars, OriginKind, Update};

/// Newest entries considered per feed.
pub const MAX_FEED_ENTRIES: usize = 10;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}
#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

struct RawEntry {
    title: String,
    summary: String,
    link: Option<String>,
    date: Option<String>,
}

/// Parse up to `MAX_FEED_ENTRIES` entries. Entries with neither title nor
/// summary are dropped; a missing title is taken from the summary's first sentence.
pub fn parse_feed(xml: &str, feed_url: &str, at: DateTime<Utc>) -> Result<Vec<Update>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let raw = parse_raw(&xml_clean)?;

    let mut out = Vec::with_capacity(raw.len().min(MAX_FEED_ENTRIES));
    for e in raw.into_iter().take(MAX_FEED_ENTRIES) {
        let summary = clean_text(&e.summary);
        let mut title = clean_text(&e.title);
        if title.is_empty() {
            title = first_sentence(&summary);
        }
        if title.is_empty() {
            continue;
        }
        let url = e
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| feed_url.to_string());
        let published = e.date.as_deref().map(normalize_date);
        out.push(Update::new(title, summary, OriginKind::Feed, url, published, at));
    }
    Ok(out)
}

fn parse_raw(xml: &str) -> Result<Vec<RawEntry>> {
    let rss_err = match from_str::<Rss>(xml) {
        Ok(rss) => {
            return Ok(rss
                .channel
                .items
                .into_iter()
                .map(|it| RawEntry {
                    title: it.title.unwrap_or_default(),
                    summary: it.description.unwrap_or_default(),
                    link: it.link,
                    date: it.pub_date,
                })
                .collect())
        }
        Err(e) => e,
    };

    let atom: AtomFeed = from_str(xml)
        .with_context(|| format!("parsing feed xml (not RSS: {rss_err})"))?;
    if atom.entries.is_empty() && !looks_like_atom(xml) {
        bail!("unrecognized feed document: {rss_err}");
    }
    Ok(atom
        .entries
        .into_iter()
        .map(|en| {
            let link = en
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .or_else(|| en.links.first())
                .and_then(|l| l.href.clone());
            RawEntry {
                title: en.title.map(|t| t.value).unwrap_or_default(),
                summary: en
                    .summary
                    .or(en.content)
                    .map(|t| t.value)
                    .unwrap_or_default(),
                link,
                date: en.published.or(en.updated),
            }
        })
        .collect())
}

fn looks_like_atom(xml: &str) -> bool {
    xml.contains("<feed")
}

/// RFC 2822 / RFC 3339 dates become RFC 3339 UTC; anything else is kept verbatim.
fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339))
        .ok()
        .and_then(|dt| dt.to_offset(UtcOffset::UTC).format(&Rfc3339).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn first_sentence(text: &str) -> String {
    let end = text.find(['.', '!', '?']).unwrap_or(text.len());
    truncate_chars(text[..end].trim(), 120)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
