//! Configuration file parser for ~/.config/feedbook/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted, but logged so typos don't go unnoticed.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::content::DEFAULT_IMAGE_QUALITY;
use crate::feed::{DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT};
use crate::storage::MemoryStore;

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

/// Where fetched feeds are cached between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Per-process LRU; nothing survives the process
    #[default]
    Memory,
    /// SQLite file at `cache_path`
    Sqlite,
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_backend: CacheBackend,

    /// SQLite cache file. Relative paths resolve against the working directory;
    /// when unset the file lives next to the config file.
    pub cache_path: Option<PathBuf>,

    /// Entries kept by the memory backend.
    pub cache_capacity: usize,

    /// Deadline for each individual HTTP request.
    pub fetch_timeout_secs: u64,

    /// Largest accepted response body, feed or image.
    pub max_response_bytes: usize,

    /// Allow fetching from loopback and private-network hosts.
    pub allow_private_hosts: bool,

    /// JPEG quality for embedded images, 1-100.
    pub image_quality: u8,

    /// Items processed at once (0 = all at once).
    pub max_concurrent_pages: usize,

    /// Deadline for a whole conversion (0 = none).
    pub conversion_timeout_secs: u64,

    /// Custom stylesheet embedded in every book.
    pub stylesheet: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackend::Memory,
            cache_path: None,
            cache_capacity: MemoryStore::DEFAULT_CAPACITY,
            fetch_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allow_private_hosts: false,
            image_quality: DEFAULT_IMAGE_QUALITY,
            max_concurrent_pages: 0,
            conversion_timeout_secs: 0,
            stylesheet: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "cache_backend",
        "cache_path",
        "cache_capacity",
        "fetch_timeout_secs",
        "max_response_bytes",
        "allow_private_hosts",
        "image_quality",
        "max_concurrent_pages",
        "conversion_timeout_secs",
        "stylesheet",
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
                // Deleted between metadata and read
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
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            cache_backend = ?config.cache_backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        if self.fetch_timeout_secs == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(self.fetch_timeout_secs)
        }
    }

    pub fn conversion_timeout(&self) -> Option<Duration> {
        (self.conversion_timeout_secs > 0).then(|| Duration::from_secs(self.conversion_timeout_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================
