//! Config file discovery for keel.

use anyhow::{Context, Result};
use keel_core::PartialConfig;
use std::path::{Path, PathBuf};

/// Load the partial config.
///
/// An explicit path must exist. Without one, `keel.toml` in the user config
/// directory is used if present, otherwise the empty config (all defaults).
pub fn load(explicit: Option<&Path>) -> Result<PartialConfig> {
    let partial = match explicit {
        Some(path) => PartialConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("using config file {}", path.display());
                PartialConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
            }
            _ => PartialConfig::default(),
        },
    };

    if partial.is_empty() {
        tracing::debug!("no overrides found, using defaults");
    }
    Ok(partial)
}

/// `keel.toml` in the platform config directory.
fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "keel", "keel")
        .map(|dirs| dirs.config_dir().join("keel.toml"))
}
