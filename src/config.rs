//! Configuration file parser for ~/.config/chanwatch/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Watch settings here are only defaults: values
//! persisted through [`PreferenceManager`](crate::preferences::PreferenceManager)
//! take precedence.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for per-install identifiers such as the background job tag.
    pub app_id: String,

    /// SQLite database location. `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,

    pub watch: WatchConfig,

    pub network: NetworkConfig,

    pub sites: Vec<SiteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: "chanwatch".to_string(),
            database_path: None,
            watch: WatchConfig::default(),
            network: NetworkConfig::default(),
            sites: vec![SiteConfig::default()],
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Master switch for bookmark watching.
    pub enabled: bool,

    /// Keep watching through scheduled background jobs when the app is not visible.
    pub in_background: bool,

    /// Initial foreground polling interval.
    pub foreground_interval_secs: u64,

    /// Upper bound for the adaptive foreground interval.
    pub max_foreground_interval_secs: u64,

    /// Delay between background watch jobs.
    pub background_interval_minutes: u64,

    /// Run filter watching periodically. 0 = only on demand.
    pub filter_watch_interval_minutes: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            in_background: false,
            foreground_interval_secs: 30,
            max_foreground_interval_secs: 600,
            background_interval_minutes: 15,
            filter_watch_interval_minutes: 0,
        }
    }
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub max_response_bytes: usize,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_response_bytes: 10 * 1024 * 1024,
            user_agent: concat!("chanwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One `[[sites]]` entry describing a JSON-API imageboard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    /// Base URL for catalog and thread JSON documents.
    pub api_base: String,
    /// Base URL for thumbnails.
    pub media_base: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "4chan".to_string(),
            api_base: "https://a.4cdn.org".to_string(),
            media_base: "https://i.4cdn.org".to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] =
        &["app_id", "database_path", "watch", "network", "sites"];
    const KNOWN_WATCH_KEYS: &'static [&'static str] = &[
        "enabled",
        "in_background",
        "foreground_interval_secs",
        "max_foreground_interval_secs",
        "background_interval_minutes",
        "filter_watch_interval_minutes",
    ];
    const KNOWN_NETWORK_KEYS: &'static [&'static str] = &[
        "request_timeout_secs",
        "max_response_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, Self::KNOWN_KEYS, None);
            if let Some(toml::Value::Table(watch)) = raw.get("watch") {
                warn_unknown_keys(watch, Self::KNOWN_WATCH_KEYS, Some("watch"));
            }
            if let Some(toml::Value::Table(network)) = raw.get("network") {
                warn_unknown_keys(network, Self::KNOWN_NETWORK_KEYS, Some("network"));
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sites = config.sites.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Default config file location (`~/.config/chanwatch/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/chanwatch/config.toml"))
    }

    /// Resolved database location.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".local/share/chanwatch/chanwatch.db"))
                .unwrap_or_else(|| PathBuf::from("chanwatch.db"))
        })
    }

    /// Scheduler tag of the background bookmark watch job for this install.
    pub fn background_watch_tag(&self) -> String {
        format!("{}_background_bookmark_watcher", self.app_id)
    }
}

fn warn_unknown_keys(table: &toml::Table, known: &[&str], section: Option<&str>) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(
                section = section.unwrap_or("root"),
                key = %key,
                "Unknown key in config file, ignoring"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
