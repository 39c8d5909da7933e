//! Preference manager that merges config.toml defaults with DB overrides.
//!
//! Config values serve as defaults; DB values (user_preferences table) override them.
//! Writes always go to the DB, never to the config file. Every write that
//! changes the effective [`WatchSettings`] is published on a `watch` channel
//! so the bookmark watch coordinator can react to it.
use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{Config, WatchConfig};
use crate::storage::Database;

pub const WATCH_ENABLED: &str = "watch.enabled";
pub const WATCH_IN_BACKGROUND: &str = "watch.in_background";
pub const FOREGROUND_INTERVAL_SECS: &str = "watch.foreground_interval_secs";
pub const MAX_FOREGROUND_INTERVAL_SECS: &str = "watch.max_foreground_interval_secs";
pub const BACKGROUND_INTERVAL_MINUTES: &str = "watch.background_interval_minutes";
pub const FILTER_WATCH_INTERVAL_MINUTES: &str = "watch.filter_watch_interval_minutes";

const BOOL_KEYS: &[&str] = &[WATCH_ENABLED, WATCH_IN_BACKGROUND];
const NUMBER_KEYS: &[&str] = &[
    FOREGROUND_INTERVAL_SECS,
    MAX_FOREGROUND_INTERVAL_SECS,
    BACKGROUND_INTERVAL_MINUTES,
    FILTER_WATCH_INTERVAL_MINUTES,
];

// ============================================================================
// WatchSettings
// ============================================================================

/// Effective bookmark-watching settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub enabled: bool,
    pub in_background: bool,
    pub foreground_interval: Duration,
    pub max_foreground_interval: Duration,
    pub background_interval: Duration,
    /// `None` disables periodic filter watching.
    pub filter_watch_interval: Option<Duration>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for WatchSettings {
    fn from(config: &WatchConfig) -> Self {
        Self::build(
            config.enabled,
            config.in_background,
            config.foreground_interval_secs,
            config.max_foreground_interval_secs,
            config.background_interval_minutes,
            config.filter_watch_interval_minutes,
        )
    }
}

impl WatchSettings {
    fn build(
        enabled: bool,
        in_background: bool,
        foreground_secs: u64,
        max_foreground_secs: u64,
        background_minutes: u64,
        filter_watch_minutes: u64,
    ) -> Self {
        let foreground_interval = Duration::from_secs(foreground_secs.max(1));
        Self {
            enabled,
            in_background,
            foreground_interval,
            max_foreground_interval: Duration::from_secs(max_foreground_secs)
                .max(foreground_interval),
            background_interval: Duration::from_secs(background_minutes.max(1) * 60),
            filter_watch_interval: (filter_watch_minutes > 0)
                .then(|| Duration::from_secs(filter_watch_minutes * 60)),
        }
    }

    fn from_prefs(prefs: &HashMap<String, String>) -> Self {
        let defaults = WatchConfig::default();
        let flag = |key: &str, default: bool| {
            prefs
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| {
            prefs
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self::build(
            flag(WATCH_ENABLED, defaults.enabled),
            flag(WATCH_IN_BACKGROUND, defaults.in_background),
            number(FOREGROUND_INTERVAL_SECS, defaults.foreground_interval_secs),
            number(
                MAX_FOREGROUND_INTERVAL_SECS,
                defaults.max_foreground_interval_secs,
            ),
            number(
                BACKGROUND_INTERVAL_MINUTES,
                defaults.background_interval_minutes,
            ),
            number(
                FILTER_WATCH_INTERVAL_MINUTES,
                defaults.filter_watch_interval_minutes,
            ),
        )
    }
}

// ============================================================================
// PreferenceManager
// ============================================================================

/// Merged preference store: config.toml defaults + DB overrides.
///
/// On load, config values are flattened into a `HashMap<String, String>`, then
/// all DB preferences are layered on top. Reads are in-memory. Writes persist
/// to the DB first and only then update the in-memory map.
pub struct PreferenceManager {
    db: Database,
    prefs: RwLock<HashMap<String, String>>,
    settings: watch::Sender<WatchSettings>,
}

impl PreferenceManager {
    /// Load preferences by merging config defaults with DB overrides.
    pub async fn load(config: &Config, db: Database) -> Result<Self> {
        let mut prefs = Self::flatten_config(config);

        // DB wins over config
        for (key, value) in db.get_preferences_by_prefix("").await? {
            prefs.insert(key, value);
        }

        let settings = WatchSettings::from_prefs(&prefs);
        tracing::debug!(?settings, "Watch settings loaded");
        let (settings, _) = watch::channel(settings);

        Ok(Self {
            db,
            prefs: RwLock::new(prefs),
            settings,
        })
    }

    /// Get a preference value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.prefs.read().get(key).cloned()
    }

    /// Set a preference: writes to DB and updates the in-memory map.
    ///
    /// Watch keys are type-checked before anything is written.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if BOOL_KEYS.contains(&key) && value.parse::<bool>().is_err() {
            bail!("{key} expects true or false, got {value:?}");
        }
        if NUMBER_KEYS.contains(&key) && value.parse::<u64>().is_err() {
            bail!("{key} expects a non-negative number, got {value:?}");
        }

        self.db.set_preference(key, value).await?;

        let settings = {
            let mut prefs = self.prefs.write();
            prefs.insert(key.to_string(), value.to_string());
            WatchSettings::from_prefs(&prefs)
        };
        self.settings.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                tracing::info!(key, value, "Watch settings changed");
                *current = settings;
                true
            }
        });
        Ok(())
    }

    // ========================================================================
    // Type-safe Accessors
    // ========================================================================

    pub fn watch_settings(&self) -> WatchSettings {
        self.settings.borrow().clone()
    }

    /// Receive every change of the effective watch settings.
    pub fn subscribe(&self) -> watch::Receiver<WatchSettings> {
        self.settings.subscribe()
    }

    pub async fn set_watch_enabled(&self, enabled: bool) -> Result<()> {
        self.set(WATCH_ENABLED, &enabled.to_string()).await
    }

    pub async fn set_watch_in_background(&self, in_background: bool) -> Result<()> {
        self.set(WATCH_IN_BACKGROUND, &in_background.to_string()).await
    }

    pub async fn set_background_interval_minutes(&self, minutes: u64) -> Result<()> {
        self.set(BACKGROUND_INTERVAL_MINUTES, &minutes.to_string())
            .await
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    /// Flatten the `[watch]` config section into dotted key-value pairs.
    fn flatten_config(config: &Config) -> HashMap<String, String> {
        let watch = &config.watch;
        [
            (WATCH_ENABLED, watch.enabled.to_string()),
            (WATCH_IN_BACKGROUND, watch.in_background.to_string()),
            (
                FOREGROUND_INTERVAL_SECS,
                watch.foreground_interval_secs.to_string(),
            ),
            (
                MAX_FOREGROUND_INTERVAL_SECS,
                watch.max_foreground_interval_secs.to_string(),
            ),
            (
                BACKGROUND_INTERVAL_MINUTES,
                watch.background_interval_minutes.to_string(),
            ),
            (
                FILTER_WATCH_INTERVAL_MINUTES,
                watch.filter_watch_interval_minutes.to_string(),
            ),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
