//! Durable per-source state: fingerprint sets and trend histories.
//!
//! One JSON file per source per concern. Writes go to a temp file that is then
//! renamed over the target, so a crash never leaves a half-written source file.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::fingerprint::FingerprintSet;
use crate::trend::TrendHistory;

pub trait StateStore: Send + Sync {
    fn load_fingerprints(&self) -> Result<HashMap<String, FingerprintSet>>;
    fn save_fingerprints(&self, key: &str, set: &FingerprintSet) -> Result<()>;
    /// Drops one source's set, or all of them when `key` is `None`.
    fn clear_fingerprints(&self, key: Option<&str>) -> Result<()>;
    fn load_histories(&self) -> Result<HashMap<String, TrendHistory>>;
    fn save_history(&self, key: &str, history: &TrendHistory) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    key: String,
    data: T,
}

/// JSON files under `<root>/fingerprints` and `<root>/trends`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fingerprints_dir(&self) -> PathBuf {
        self.root.join("fingerprints")
    }

    fn trends_dir(&self) -> PathBuf {
        self.root.join("trends")
    }
}

impl StateStore for FileStore {
    fn load_fingerprints(&self) -> Result<HashMap<String, FingerprintSet>> {
        load_dir(&self.fingerprints_dir())
    }

    fn save_fingerprints(&self, key: &str, set: &FingerprintSet) -> Result<()> {
        save_entry(&self.fingerprints_dir(), key, set)
    }

    fn clear_fingerprints(&self, key: Option<&str>) -> Result<()> {
        let dir = self.fingerprints_dir();
        match key {
            Some(k) => {
                let p = dir.join(file_name_for(k));
                if p.exists() {
                    fs::remove_file(&p).with_context(|| format!("removing {}", p.display()))?;
                }
            }
            None => {
                if dir.exists() {
                    fs::remove_dir_all(&dir)
                        .with_context(|| format!("removing {}", dir.display()))?;
                }
            }
        }
        Ok(())
    }

    fn load_histories(&self) -> Result<HashMap<String, TrendHistory>> {
        load_dir(&self.trends_dir())
    }

    fn save_history(&self, key: &str, history: &TrendHistory) -> Result<()> {
        save_entry(&self.trends_dir(), key, history)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    fingerprints: Mutex<HashMap<String, FingerprintSet>>,
    histories: Mutex<HashMap<String, TrendHistory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_fingerprints(&self) -> Result<HashMap<String, FingerprintSet>> {
        Ok(lock(&self.fingerprints).clone())
    }

    fn save_fingerprints(&self, key: &str, set: &FingerprintSet) -> Result<()> {
        lock(&self.fingerprints).insert(key.to_string(), set.clone());
        Ok(())
    }

    fn clear_fingerprints(&self, key: Option<&str>) -> Result<()> {
        let mut g = lock(&self.fingerprints);
        match key {
            Some(k) => {
                g.remove(k);
            }
            None => g.clear(),
        }
        Ok(())
    }

    fn load_histories(&self) -> Result<HashMap<String, TrendHistory>> {
        Ok(lock(&self.histories).clone())
    }

    fn save_history(&self, key: &str, history: &TrendHistory) -> Result<()> {
        lock(&self.histories).insert(key.to_string(), history.clone());
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<HashMap<String, T>> {
    let mut out = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json::<Envelope<T>>(&path) {
            Ok(env) => {
                out.insert(env.key, env.data);
            }
            Err(e) => {
                // One corrupt source file must not take the others down.
                tracing::warn!(error = ?e, path = %path.display(), "skipping unreadable state file");
            }
        }
    }
    Ok(out)
}

fn save_entry<T: Serialize>(dir: &Path, key: &str, data: &T) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let env = Envelope {
        key: key.to_string(),
        data,
    };
    write_json_atomic(&dir.join(file_name_for(key)), &env)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let s = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

/// Write-then-rename so readers only ever see a complete file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value).context("serializing state")?;
    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Filesystem-safe, collision-resistant file name for a source key.
fn file_name_for(key: &str) -> String {
    let slug: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .take(40)
        .collect();
    let digest = crate::fingerprint::short_hash(key, 4);
    format!("{slug}-{digest}.json")
}
