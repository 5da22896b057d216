//! Client configuration and the defaults merge.
//!
//! Configuration comes in two shapes:
//! - [`ResolvedConfig`]: every leaf populated; collaborators are built from it
//! - [`PartialConfig`]: every section and leaf optional; this is what callers supply
//!
//! [`merge`] overlays a partial onto a resolved config section by section.
//! A leaf present in the partial replaces the default wholesale. A leaf absent
//! from the partial keeps the default.
//!
//! # Clearing nullable leaves
//!
//! Leaves that are nullable in the resolved config (`store.credentials`,
//! `network.ping_url`) are `Option<Option<T>>` in the partial. `Some(None)`
//! (JSON `null`) overwrites the default with nothing; it is not treated as
//! "missing". Every other leaf, and every section, has no empty form: an
//! explicit `null` there is a parse error rather than a silent fallback to
//! the default.
//!
//! # Example
//!
//! ```
//! use keel_core::config::{merge, PartialConfig, PartialSyncConfig, ResolvedConfig};
//!
//! let partial = PartialConfig {
//!     sync: Some(PartialSyncConfig {
//!         url: Some("http://x/api".into()),
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//!
//! let resolved = merge(ResolvedConfig::default(), partial);
//! assert_eq!(resolved.sync.url, "http://x/api");
//! assert_eq!(resolved.store, ResolvedConfig::default().store);
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default store name.
pub const DEFAULT_STORE_NAME: &str = "keel";
/// Default network ping interval (30 seconds).
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
/// Default background sync interval (60 seconds).
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 60_000;
/// Default outbox retry limit.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default delay between outbox retries (1 second).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// A resolved config node that a partial of the same shape can be laid over.
pub trait Overlay {
    /// The all-optional mirror of `Self`.
    type Partial;

    /// Replace every leaf present in `partial`, recursing into sections.
    fn overlay(&mut self, partial: Self::Partial);
}

/// Merge `partial` onto `defaults`.
///
/// Deterministic: the same inputs always produce the same output, and an
/// empty partial returns `defaults` unchanged. No range or type validation
/// happens here; bad values surface when a collaborator is built from them.
pub fn merge(defaults: ResolvedConfig, partial: PartialConfig) -> ResolvedConfig {
    let mut resolved = defaults;
    resolved.overlay(partial);
    resolved
}

fn apply<T>(slot: &mut T, patch: Option<T>) {
    if let Some(value) = patch {
        *slot = value;
    }
}

/// Deserialize a present field (including `null`) as `Some(..)`.
///
/// Used with `#[serde(default)]` so a missing field stays `None`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Deserialize a present field, rejecting `null`.
///
/// For sections and leaves that have no empty form. A missing field still
/// falls back to `#[serde(default)]`.
fn non_null<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer)? {
        Some(value) => Ok(Some(value)),
        None => Err(D::Error::custom(
            "null is not allowed here; omit the key to keep the default",
        )),
    }
}

// ===========================================
// Resolved configuration
// ===========================================

/// Fully-populated configuration, one section per collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    /// Local persistent store.
    pub store: StoreConfig,
    /// Network reachability monitor.
    pub network: NetworkConfig,
    /// Background synchronizer.
    pub sync: SyncConfig,
    /// Pending-writes outbox.
    pub outbox: OutboxConfig,
}

impl ResolvedConfig {
    /// The synchronizer target, if background sync should run.
    ///
    /// Requires `sync.enabled` and a non-blank `sync.url`.
    pub fn sync_target(&self) -> Option<SyncTarget> {
        if !self.sync.enabled || self.sync.url.trim().is_empty() {
            return None;
        }
        Some(SyncTarget {
            url: self.sync.url.clone(),
            interval: self.sync.interval(),
        })
    }

    /// Render as pretty JSON (credentials redacted).
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Overlay for ResolvedConfig {
    type Partial = PartialConfig;

    fn overlay(&mut self, partial: PartialConfig) {
        if let Some(store) = partial.store {
            self.store.overlay(store);
        }
        if let Some(network) = partial.network {
            self.network.overlay(network);
        }
        if let Some(sync) = partial.sync {
            self.sync.overlay(sync);
        }
        if let Some(outbox) = partial.outbox {
            self.outbox.overlay(outbox);
        }
    }
}

/// Store section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreConfig {
    /// Name of the store to open or create.
    pub name: String,
    /// Credentials for an encrypted or authenticated store.
    pub credentials: Option<Credentials>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            credentials: None,
        }
    }
}

impl Overlay for StoreConfig {
    type Partial = PartialStoreConfig;

    fn overlay(&mut self, partial: PartialStoreConfig) {
        apply(&mut self.name, partial.name);
        apply(&mut self.credentials, partial.credentials);
    }
}

/// Store credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    /// Account or key name.
    pub username: String,
    /// Secret. Never printed.
    #[serde(serialize_with = "redacted")]
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn redacted<S: Serializer>(_: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("[REDACTED]")
}

/// Network monitor section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    /// Endpoint probed for reachability. `None` leaves probing to the monitor.
    pub ping_url: Option<String>,
    /// Probe interval in milliseconds.
    pub ping_interval_ms: u64,
}

impl NetworkConfig {
    /// Probe interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ping_url: None,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
        }
    }
}

impl Overlay for NetworkConfig {
    type Partial = PartialNetworkConfig;

    fn overlay(&mut self, partial: PartialNetworkConfig) {
        apply(&mut self.ping_url, partial.ping_url);
        apply(&mut self.ping_interval_ms, partial.ping_interval_ms);
    }
}

/// Synchronizer section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    /// Whether background sync may run at all.
    pub enabled: bool,
    /// Remote endpoint. Empty means "no remote".
    pub url: String,
    /// Sync interval in milliseconds.
    pub interval_ms: u64,
}

impl SyncConfig {
    /// Sync interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            interval_ms: DEFAULT_SYNC_INTERVAL_MS,
        }
    }
}

impl Overlay for SyncConfig {
    type Partial = PartialSyncConfig;

    fn overlay(&mut self, partial: PartialSyncConfig) {
        apply(&mut self.enabled, partial.enabled);
        apply(&mut self.url, partial.url);
        apply(&mut self.interval_ms, partial.interval_ms);
    }
}

/// Outbox section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxConfig {
    /// Attempts before an entry is given up on.
    pub max_retries: u32,
    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
}

impl OutboxConfig {
    /// Delay between attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Overlay for OutboxConfig {
    type Partial = PartialOutboxConfig;

    fn overlay(&mut self, partial: PartialOutboxConfig) {
        apply(&mut self.max_retries, partial.max_retries);
        apply(&mut self.retry_delay_ms, partial.retry_delay_ms);
    }
}

/// What the synchronizer is built with: `{url, interval}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Remote endpoint.
    pub url: String,
    /// Sync interval.
    pub interval: Duration,
}

// ===========================================
// Partial configuration
// ===========================================

/// User-supplied configuration. Any subset of sections and leaves may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    /// Store overrides.
    #[serde(deserialize_with = "non_null")]
    pub store: Option<PartialStoreConfig>,
    /// Network overrides.
    #[serde(deserialize_with = "non_null")]
    pub network: Option<PartialNetworkConfig>,
    /// Sync overrides.
    #[serde(deserialize_with = "non_null")]
    pub sync: Option<PartialSyncConfig>,
    /// Outbox overrides.
    #[serde(deserialize_with = "non_null")]
    pub outbox: Option<PartialOutboxConfig>,
}

impl PartialConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse from a JSON document.
    ///
    /// JSON `null` clears nullable leaves and is rejected everywhere else.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a file: `.json` is parsed as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        parsed.map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }

    /// True if no section is set.
    pub fn is_empty(&self) -> bool {
        self.store.is_none()
            && self.network.is_none()
            && self.sync.is_none()
            && self.outbox.is_none()
    }
}

/// Store overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialStoreConfig {
    /// Store name.
    #[serde(deserialize_with = "non_null")]
    pub name: Option<String>,
    /// Credentials. `Some(None)` clears the default.
    #[serde(deserialize_with = "nullable")]
    pub credentials: Option<Option<Credentials>>,
}

/// Network overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialNetworkConfig {
    /// Ping URL. `Some(None)` clears the default.
    #[serde(deserialize_with = "nullable")]
    pub ping_url: Option<Option<String>>,
    /// Ping interval in milliseconds.
    #[serde(deserialize_with = "non_null")]
    pub ping_interval_ms: Option<u64>,
}

/// Sync overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialSyncConfig {
    /// Enable or disable background sync.
    #[serde(deserialize_with = "non_null")]
    pub enabled: Option<bool>,
    /// Remote endpoint.
    #[serde(deserialize_with = "non_null")]
    pub url: Option<String>,
    /// Sync interval in milliseconds.
    #[serde(deserialize_with = "non_null")]
    pub interval_ms: Option<u64>,
}

/// Outbox overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialOutboxConfig {
    /// Retry limit.
    #[serde(deserialize_with = "non_null")]
    pub max_retries: Option<u32>,
    /// Retry delay in milliseconds.
    #[serde(deserialize_with = "non_null")]
    pub retry_delay_ms: Option<u64>,
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying parse error.
        source: Box<ConfigError>,
    },

    /// Invalid TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
