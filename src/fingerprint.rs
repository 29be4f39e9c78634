//! Content fingerprints and the bounded per-source "already reported" sets.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::model::{source_key, truncate_chars, Update};

/// Body prefix length that participates in the fingerprint.
pub const BODY_PREFIX_CHARS: usize = 100;
pub const DEFAULT_FINGERPRINT_CAP: usize = 100;

/// 128-bit SHA-256 prefix, hex encoded (32 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(title: &str, body: &str) -> Self {
        let material = format!(
            "{}\u{1f}{}",
            collapse_ws(title),
            collapse_ws(&truncate_chars(body, BODY_PREFIX_CHARS))
        );
        Self(hex_prefix(material.as_bytes(), 16))
    }

    pub fn of_update(u: &Update) -> Self {
        Self::of(u.title(), u.body())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(n * 2);
    for b in digest.iter().take(n) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Short hex digest for ids and file names (never for dedup).
pub(crate) fn short_hash(text: &str, bytes: usize) -> String {
    hex_prefix(text.as_bytes(), bytes)
}

/// Insertion-ordered set with FIFO eviction once `cap` is exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FingerprintSetRepr", into = "FingerprintSetRepr")]
pub struct FingerprintSet {
    cap: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

#[derive(Serialize, Deserialize)]
struct FingerprintSetRepr {
    cap: usize,
    /// Oldest first.
    entries: Vec<Fingerprint>,
}

impl From<FingerprintSetRepr> for FingerprintSet {
    fn from(r: FingerprintSetRepr) -> Self {
        let mut set = FingerprintSet::with_cap(r.cap);
        for fp in r.entries {
            set.insert(fp);
        }
        set
    }
}

impl From<FingerprintSet> for FingerprintSetRepr {
    fn from(s: FingerprintSet) -> Self {
        Self {
            cap: s.cap,
            entries: s.order.into_iter().collect(),
        }
    }
}

impl FingerprintSet {
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            order: VecDeque::with_capacity(cap.min(1024)),
            members: HashSet::with_capacity(cap.min(1024)),
        }
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.members.contains(fp)
    }

    /// Returns false if already present. Evicts oldest entries past the cap.
    pub fn insert(&mut self, fp: Fingerprint) -> bool {
        if !self.members.insert(fp.clone()) {
            return false;
        }
        self.order.push_back(fp);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.order.iter()
    }

    fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }
}

/// Source key -> fingerprint set. Keys are case-insensitive source names.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    cap: usize,
    sets: HashMap<String, FingerprintSet>,
}

impl Default for FingerprintStore {
    fn default() -> Self {
        Self::with_cap(DEFAULT_FINGERPRINT_CAP)
    }
}

impl FingerprintStore {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            sets: HashMap::new(),
        }
    }

    /// Seed from persisted sets; the configured cap wins over the stored one.
    pub fn from_sets(cap: usize, sets: HashMap<String, FingerprintSet>) -> Self {
        let mut store = Self::with_cap(cap);
        for (k, mut set) in sets {
            set.set_cap(store.cap);
            store.sets.insert(source_key(&k), set);
        }
        store
    }

    /// Yields only unseen candidates (in input order) and commits their
    /// fingerprints immediately. Duplicates inside the batch count as seen.
    pub fn filter(&mut self, source_id: &str, candidates: Vec<Update>) -> Vec<Update> {
        let cap = self.cap;
        let set = self
            .sets
            .entry(source_key(source_id))
            .or_insert_with(|| FingerprintSet::with_cap(cap));

        let mut unseen = Vec::with_capacity(candidates.len());
        for u in candidates {
            let fp = Fingerprint::of_update(&u);
            if set.insert(fp) {
                unseen.push(u);
            }
        }
        unseen
    }

    /// Read-only membership check, no commit.
    pub fn is_seen(&self, source_id: &str, update: &Update) -> bool {
        self.sets
            .get(&source_key(source_id))
            .is_some_and(|s| s.contains(&Fingerprint::of_update(update)))
    }

    pub fn set_for(&self, source_id: &str) -> Option<&FingerprintSet> {
        self.sets.get(&source_key(source_id))
    }

    pub fn reset(&mut self, source_id: Option<&str>) -> usize {
        match source_id {
            Some(id) => usize::from(self.sets.remove(&source_key(id)).is_some()),
            None => {
                let n = self.sets.len();
                self.sets.clear();
                n
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OriginKind;
    use chrono::Utc;

    fn upd(title: &str, body: &str) -> Update {
        Update::new(title, body, OriginKind::Feed, "https://x.test", None, Utc::now())
    }

    #[test]
    fn fingerprint_is_fixed_length_and_stable() {
        let a = Fingerprint::of("Launch", "We launched a thing");
        let b = Fingerprint::of("Launch", "We launched a thing");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn only_body_prefix_matters() {
        let prefix = "x".repeat(BODY_PREFIX_CHARS);
        let a = Fingerprint::of("T", &format!("{prefix} tail one"));
        let b = Fingerprint::of("T", &format!("{prefix} tail two, longer"));
        assert_eq!(a, b);
    }

    #[test]
    fn one_char_edit_is_a_new_fingerprint() {
        let a = Fingerprint::of("Dark mode", "Now available for all users");
        let b = Fingerprint::of("Dark mode", "Now available for all usera");
        let c = Fingerprint::of("Dark Mode", "Now available for all users");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn title_body_boundary_is_unambiguous() {
        assert_ne!(Fingerprint::of("ab", "c"), Fingerprint::of("a", "bc"));
    }

    #[test]
    fn set_evicts_oldest_first() {
        let mut set = FingerprintSet::with_cap(3);
        let fps: Vec<_> = (0..5).map(|i| Fingerprint::of(&format!("t{i}"), "b")).collect();
        for fp in &fps {
            assert!(set.insert(fp.clone()));
        }
        assert_eq!(set.len(), 3);
        let kept: Vec<_> = set.iter().cloned().collect();
        assert_eq!(kept, fps[2..].to_vec());
        assert!(!set.contains(&fps[0]));
    }

    #[test]
    fn filter_is_idempotent_and_case_insensitive_on_source() {
        let mut store = FingerprintStore::with_cap(10);
        let batch = vec![upd("A", "1"), upd("B", "2"), upd("A", "1")];
        let first = store.filter("Acme", batch.clone());
        assert_eq!(first.len(), 2);
        let second = store.filter("ACME", batch);
        assert!(second.is_empty());
    }

    #[test]
    fn serde_repr_rebuilds_membership() {
        let mut set = FingerprintSet::with_cap(2);
        set.insert(Fingerprint::of("a", ""));
        set.insert(Fingerprint::of("b", ""));
        let json = serde_json::to_string(&set).unwrap();
        let back: FingerprintSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert!(back.contains(&Fingerprint::of("a", "")));
    }

    #[test]
    fn reloaded_sets_respect_new_cap() {
        let mut set = FingerprintSet::with_cap(10);
        for i in 0..10 {
            set.insert(Fingerprint::of(&i.to_string(), ""));
        }
        let store = FingerprintStore::from_sets(4, HashMap::from([("Acme".to_string(), set)]));
        assert_eq!(store.set_for("acme").map(|s| s.len()), Some(4));
    }
}
