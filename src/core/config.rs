use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::core::types::ListingMode;

// ---------------------------------------------------------------------------
// TrackerConfig — file-based config loader (rankwatch.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "RANKWATCH_CONFIG";
pub const ENV_SHEETS_TOKEN: &str = "SHEETS_API_TOKEN";
pub const ENV_SOLVER_API_KEY: &str = "CAPTCHA_API_KEY";
pub const ENV_BOT_TOKEN: &str = "NOTIFY_BOT_TOKEN";

/// Browser/session options. Every recognized launch option is enumerated
/// here with a default and validated once at session construction — there
/// is no dynamically-shaped options dict anywhere downstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfigSection {
    pub headless: bool,
    /// Candidate viewport widths/heights; one pair is drawn per launch so
    /// restarted sessions don't share an exact fingerprint.
    pub viewport_widths: Vec<u32>,
    pub viewport_heights: Vec<u32>,
    pub locale: String,
    pub timezone: String,
    /// Root directory for persistent profiles; each worker gets its own
    /// subdirectory. Defaults to `~/.rankwatch/profiles`.
    pub profile_dir: Option<PathBuf>,
    /// Proxy URLs handed out round-robin, one per session.
    pub proxies: Vec<String>,
    pub nav_timeout_ms: u64,
    /// Explicit browser binary; auto-discovered when unset.
    pub executable: Option<String>,
}

impl Default for BrowserConfigSection {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_widths: vec![1920, 1903, 1912],
            viewport_heights: vec![1080, 969, 1040],
            locale: "ru-RU".to_string(),
            timezone: "Europe/Moscow".to_string(),
            profile_dir: None,
            proxies: Vec::new(),
            nav_timeout_ms: 30_000,
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfigSection {
    /// Listing root, e.g. `https://www.ozon.ru`.
    pub base_url: String,
    /// Maximum rank scanned before declaring not-found.
    pub max_position: u32,
    pub listing_mode: ListingMode,
    /// Consecutive empty advances tolerated before declaring end-of-listing.
    pub empty_advance_limit: u32,
    /// One-second polls granted for a manual captcha solve.
    pub captcha_wait_secs: u32,
}

impl Default for SearchConfigSection {
    fn default() -> Self {
        Self {
            base_url: "https://www.ozon.ru".to_string(),
            max_position: 1000,
            listing_mode: ListingMode::Auto,
            empty_advance_limit: 5,
            captcha_wait_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigSection {
    pub concurrency: usize,
    pub retry_attempts: u32,
    /// Upper bound of the randomized backoff before a session rebuild.
    pub backoff_max_ms: u64,
    /// Upper bound of the per-worker startup jitter.
    pub startup_jitter_ms: u64,
    /// How long an in-flight search may keep running after a shutdown
    /// request before the worker abandons it.
    pub cancel_grace_ms: u64,
    /// Hour of day (local) at which the resident scheduler consolidates
    /// the previous day's hourly buckets.
    pub consolidate_at_hour: u8,
}

impl Default for SchedulerConfigSection {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry_attempts: 3,
            backoff_max_ms: 15_000,
            startup_jitter_ms: 2_000,
            cancel_grace_ms: 10_000,
            consolidate_at_hour: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfigSection {
    pub spreadsheet_id: String,
    pub worksheet: String,
    /// OAuth bearer token; falls back to `SHEETS_API_TOKEN`.
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SolverConfigSection {
    /// API key for the external solving service; falls back to
    /// `CAPTCHA_API_KEY`. Unset = manual-wait fallback only.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfigSection {
    /// Bot token; falls back to `NOTIFY_BOT_TOKEN`. Unset = notifications off.
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// Top-level config loaded from `rankwatch.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub browser: BrowserConfigSection,
    pub search: SearchConfigSection,
    pub scheduler: SchedulerConfigSection,
    pub ledger: LedgerConfigSection,
    pub solver: SolverConfigSection,
    pub notify: NotifyConfigSection,
}

impl TrackerConfig {
    /// Validate the knobs that would otherwise fail deep inside a worker.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            bail!("scheduler.concurrency must be >= 1");
        }
        if self.search.max_position == 0 {
            bail!("search.max_position must be >= 1");
        }
        if self.browser.viewport_widths.is_empty() || self.browser.viewport_heights.is_empty() {
            bail!("browser.viewport_widths/heights must not be empty");
        }
        if self.scheduler.consolidate_at_hour > 23 {
            bail!("scheduler.consolidate_at_hour must be 0..=23");
        }
        for proxy in &self.browser.proxies {
            if url::Url::parse(proxy).is_err() {
                bail!("invalid proxy URL in browser.proxies: {proxy}");
            }
        }
        Ok(())
    }

    pub fn sheets_token(&self) -> Option<String> {
        resolve_secret(self.ledger.api_token.as_deref(), ENV_SHEETS_TOKEN)
    }

    pub fn solver_api_key(&self) -> Option<String> {
        resolve_secret(self.solver.api_key.as_deref(), ENV_SOLVER_API_KEY)
    }

    pub fn notify_bot_token(&self) -> Option<String> {
        resolve_secret(self.notify.bot_token.as_deref(), ENV_BOT_TOKEN)
    }

    /// Profile root: config value → `~/.rankwatch/profiles` → `./profiles`.
    pub fn profile_root(&self) -> PathBuf {
        if let Some(dir) = &self.browser.profile_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|h| h.join(".rankwatch").join("profiles"))
            .unwrap_or_else(|| PathBuf::from("profiles"))
    }
}

fn resolve_secret(configured: Option<&str>, env_key: &str) -> Option<String> {
    if let Some(v) = configured {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }
    std::env::var(env_key).ok().filter(|v| !v.trim().is_empty())
}

/// Load `rankwatch.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `RANKWATCH_CONFIG` env var path
/// 2. `./rankwatch.json`
/// 3. `../rankwatch.json`
///
/// Missing file → defaults (env-var fallbacks still apply).
/// Parse error → log a warning, return defaults.
pub fn load_config() -> TrackerConfig {
    let mut candidates = vec![
        PathBuf::from("rankwatch.json"),
        PathBuf::from("../rankwatch.json"),
    ];
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<TrackerConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("rankwatch.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "rankwatch.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return TrackerConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    TrackerConfig::default()
}
