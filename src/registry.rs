//! Tracked sources, keyed by case-insensitive name, persisted as one JSON document.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::model::{source_key, Priority, Source};
use crate::store::{read_json, write_json_atomic};

pub const DEFAULT_REGISTRY_FILE: &str = "sources.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source name must not be empty")]
    EmptyName,
    #[error("source {0:?} needs a page or feed address")]
    MissingAddress(String),
    #[error("source {0:?} is already registered")]
    Duplicate(String),
    #[error("no source named {0:?}")]
    NotFound(String),
}

/// Registration input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSource {
    pub name: String,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn page(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn feed(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn priority(mut self, p: Priority) -> Self {
        self.priority = p;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    /// Registration order.
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, input: NewSource) -> Result<&Source, RegistryError> {
        let mut source = Source::new(
            input.name.trim(),
            clean_url(input.page_url),
            clean_url(input.feed_url),
        );
        self.admissible(&source)?;
        if let Some(c) = input.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
            source.category = c;
        }
        source.priority = input.priority;
        source.tags = clean_tags(input.tags);

        tracing::info!(source = %source.name, category = %source.category, "source registered");
        self.sources.push(source);
        Ok(&self.sources[self.sources.len() - 1])
    }

    /// Rebuilds a registry from stored sources, applying the registration
    /// checks. Rejected entries are logged and left out.
    pub fn from_sources(sources: Vec<Source>) -> Self {
        let mut reg = Self::new();
        for mut s in sources {
            s.name = s.name.trim().to_string();
            s.page_url = clean_url(s.page_url.take());
            s.feed_url = clean_url(s.feed_url.take());
            s.tags = clean_tags(std::mem::take(&mut s.tags));
            if let Err(e) = reg.admissible(&s) {
                tracing::warn!(source = %s.name, error = %e, "stored source rejected");
                continue;
            }
            reg.sources.push(s);
        }
        reg
    }

    fn admissible(&self, source: &Source) -> Result<(), RegistryError> {
        if source.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.position(&source.name).is_some() {
            return Err(RegistryError::Duplicate(source.name.clone()));
        }
        if !source.has_address() {
            return Err(RegistryError::MissingAddress(source.name.clone()));
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Source, RegistryError> {
        let idx = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(self.sources.remove(idx))
    }

    /// Flips `enabled`; returns the new state.
    pub fn toggle(&mut self, name: &str) -> Result<bool, RegistryError> {
        let s = self.get_mut(name)?;
        s.enabled = !s.enabled;
        Ok(s.enabled)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        self.get_mut(name)?.enabled = enabled;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.position(name).map(|i| &self.sources[i])
    }

    pub fn list(&self) -> &[Source] {
        &self.sources
    }

    /// Snapshot of enabled sources in registration order.
    pub fn enabled(&self) -> Vec<Source> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn mark_checked(&mut self, name: &str, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.get_mut(name)?.last_checked = Some(at);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Missing file means an empty registry. Entries that would fail
    /// `register` are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let stored: Self = read_json(path)?;
        Ok(Self::from_sources(stored.sources))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    fn position(&self, name: &str) -> Option<usize> {
        let key = source_key(name);
        self.sources.iter().position(|s| s.key() == key)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Source, RegistryError> {
        match self.position(name) {
            Some(i) => Ok(&mut self.sources[i]),
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }
}

fn clean_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for t in tags {
        let t = t.trim().to_string();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(&t)) {
            out.push(t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_validates_and_normalizes() {
        let mut reg = SourceRegistry::new();
        let s = reg
            .register(
                NewSource::new("  Acme ")
                    .feed(" https://acme.test/feed ")
                    .page("   ")
                    .tags(["crm", " CRM", "", "smb"]),
            )
            .unwrap();
        assert_eq!(s.name, "Acme");
        assert_eq!(s.feed_url.as_deref(), Some("https://acme.test/feed"));
        assert_eq!(s.page_url, None);
        assert_eq!(s.category, "Unknown");
        assert_eq!(s.tags, vec!["crm", "smb"]);
        assert!(s.enabled);

        assert_eq!(
            reg.register(NewSource::new("ACME").page("https://x.test")).unwrap_err(),
            RegistryError::Duplicate("ACME".into())
        );
        assert_eq!(
            reg.register(NewSource::new("Nowhere")).unwrap_err(),
            RegistryError::MissingAddress("Nowhere".into())
        );
        assert_eq!(
            reg.register(NewSource::new(" ").page("https://x.test")).unwrap_err(),
            RegistryError::EmptyName
        );
    }

    #[test]
    fn toggle_and_enabled_snapshot() {
        let mut reg = SourceRegistry::new();
        reg.register(NewSource::new("Acme").page("https://a.test")).unwrap();
        reg.register(NewSource::new("Beta").page("https://b.test")).unwrap();
        assert!(!reg.toggle("beta").unwrap());
        let names: Vec<_> = reg.enabled().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Acme"]);
        reg.set_enabled("BETA", true).unwrap();
        assert_eq!(reg.enabled().len(), 2);
        assert!(matches!(reg.toggle("gamma"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn remove_and_mark_checked() {
        let mut reg = SourceRegistry::new();
        reg.register(NewSource::new("Acme").page("https://a.test")).unwrap();
        let at = Utc::now();
        reg.mark_checked("acme", at).unwrap();
        assert_eq!(reg.get("Acme").unwrap().last_checked, Some(at));
        let removed = reg.remove("ACME").unwrap();
        assert_eq!(removed.name, "Acme");
        assert!(reg.is_empty());
        assert!(reg.remove("Acme").is_err());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join(DEFAULT_REGISTRY_FILE);
        assert!(SourceRegistry::load(&path).unwrap().is_empty());

        let mut reg = SourceRegistry::new();
        reg.register(
            NewSource::new("Acme")
                .page("https://a.test")
                .category("CRM")
                .priority(Priority::High),
        )
        .unwrap();
        reg.save(&path).unwrap();

        let back = SourceRegistry::load(&path).unwrap();
        let s = back.get("acme").unwrap();
        assert_eq!(s.category, "CRM");
        assert_eq!(s.priority, Priority::High);
    }

    #[test]
    fn load_skips_entries_register_would_reject() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_REGISTRY_FILE);
        std::fs::write(
            &path,
            r#"{"sources": [
                {"name": "Nowhere", "created_at": "2025-01-01T00:00:00Z"},
                {"name": " Acme ", "page_url": "https://a.test", "created_at": "2025-01-01T00:00:00Z"},
                {"name": "ACME", "feed_url": "https://b.test/feed", "created_at": "2025-01-01T00:00:00Z"},
                {"name": "  ", "page_url": "https://c.test", "created_at": "2025-01-01T00:00:00Z"},
                {"name": "Beta", "page_url": " ", "feed_url": "https://beta.test/rss", "created_at": "2025-01-01T00:00:00Z"}
            ]}"#,
        )
        .unwrap();

        let reg = SourceRegistry::load(&path).unwrap();
        let names: Vec<_> = reg.list().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Beta"]);
        assert_eq!(reg.get("acme").unwrap().page_url.as_deref(), Some("https://a.test"));
        assert_eq!(reg.get("beta").unwrap().page_url, None);
    }
}
