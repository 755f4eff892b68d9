use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_NETLIFY_API_BASE: &str = "https://api.netlify.com/api/v1";
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

/// Upper bound for every `[sync]` interval: one year.
pub const MAX_SYNC_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Tokens used to talk to the upstream sources.
#[derive(Clone, Default)]
pub struct Credentials {
    pub netlify_token: Option<String>,
    pub github_token: Option<String>,
}

impl Credentials {
    pub fn netlify(&self) -> Option<&str> {
        non_empty(self.netlify_token.as_deref())
    }

    pub fn github(&self) -> Option<&str> {
        non_empty(self.github_token.as_deref())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("netlify_token", &self.netlify().map(|_| "<redacted>"))
            .field("github_token", &self.github().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncTuning {
    /// A mirror older than this is refreshed on the next trigger.
    pub stale_threshold_secs: u64,
    /// Window stamped into `next_sync_at` when a pass is dispatched.
    pub cooldown_secs: u64,
    pub pr_status_ttl_secs: u64,
    /// Server-side `request_sync(false)` interval. `0` disables the ticker.
    pub background_tick_secs: u64,
}

impl SyncTuning {
    pub fn stale_threshold(&self) -> chrono::Duration {
        interval(self.stale_threshold_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        interval(self.cooldown_secs)
    }

    pub fn pr_status_ttl(&self) -> chrono::Duration {
        interval(self.pr_status_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        for (key, secs) in [
            ("stale_threshold_secs", self.stale_threshold_secs),
            ("cooldown_secs", self.cooldown_secs),
            ("pr_status_ttl_secs", self.pr_status_ttl_secs),
            ("background_tick_secs", self.background_tick_secs),
        ] {
            if secs > MAX_SYNC_INTERVAL_SECS {
                bail!(
                    "sync.{} = {} exceeds the maximum of {} seconds",
                    key,
                    secs,
                    MAX_SYNC_INTERVAL_SECS
                );
            }
        }
        Ok(())
    }
}

/// Clamped so timestamp arithmetic on the result cannot overflow.
fn interval(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_SYNC_INTERVAL_SECS) as i64)
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 60,
            cooldown_secs: 30,
            pr_status_ttl_secs: 60,
            background_tick_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub netlify_api_base: String,
    pub github_api_base: String,
    pub netlify_token: Option<String>,
    pub github_token: Option<String>,
    pub http_timeout_secs: u64,
    pub sync: SyncTuning,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 17980,
            database_path: None,
            log_level: "info".to_string(),
            netlify_api_base: DEFAULT_NETLIFY_API_BASE.to_string(),
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            netlify_token: None,
            github_token: None,
            http_timeout_secs: 10,
            sync: SyncTuning::default(),
        }
    }
}

impl MirrorConfig {
    /// Reads `<data_dir>/config.toml` when present, then applies environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.sync.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("NETLIFY_AUTH_TOKEN") {
            self.netlify_token = Some(token);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github_token = Some(token);
        }
        if let Some(host) = lookup("RUNMIRROR_API_HOST") {
            self.api_host = host;
        }
        if let Some(port) = lookup("RUNMIRROR_API_PORT").and_then(|p| p.parse().ok()) {
            self.api_port = port;
        }
        if let Some(level) = lookup("RUNMIRROR_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir.join("mirror.db"))
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            netlify_token: self.netlify_token.clone(),
            github_token: self.github_token.clone(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn max_log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}
