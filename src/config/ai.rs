use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";

fn default_daily_limit() -> u32 {
    50
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    pub enabled: bool,
    /// "openai" (case-insensitive); anything else disables the reasoning path.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Real (non-cached) reasoning calls allowed per UTC day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            daily_limit: default_daily_limit(),
            api_key: String::new(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiConfig = serde_json::from_str(&data)?;

        cfg.provider = cfg.provider.to_lowercase();

        if cfg.api_key.trim().is_empty() || cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY").unwrap_or_default(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if cfg.daily_limit == 0 {
            cfg.daily_limit = default_daily_limit();
        }

        Ok(cfg)
    }

    /// Like `load_from_file`, but a missing or broken file means "AI disabled".
    pub fn load_or_disabled<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_file(path.as_ref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!(error = %e, path = %path.as_ref().display(), "AI config unavailable, reasoning disabled");
                Self::default()
            }
        }
    }

    /// Enabled and holding a key; otherwise analysis runs rule-based only.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}
