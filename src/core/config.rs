//! KN-006: Run settings — YAML first, JSON as fallback.

use super::types::ErrorPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file read when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "kiln.yaml";

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Scratch directory for downloads and generated scripts.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Deadline for streamed commands (git, shell).
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Deadline for a whole download.
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,

    /// Draw download progress bars.
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir().join("kiln")
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tmp_dir: default_tmp_dir(),
            on_error: ErrorPolicy::default(),
            command_timeout_secs: None,
            download_timeout_secs: None,
            progress: true,
        }
    }
}

impl Settings {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }
}

/// Parse settings text: YAML, then JSON. An empty document means defaults.
pub fn parse_settings(content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    match serde_yaml_ng::from_str(content) {
        Ok(settings) => Ok(settings),
        Err(yaml_err) => serde_json::from_str(content).map_err(|json_err| Error::Parse {
            what: "settings".to_string(),
            message: format!("not YAML ({}) nor JSON ({})", yaml_err, json_err),
        }),
    }
}

/// Load settings from `explicit`, or from [`DEFAULT_SETTINGS_FILE`] in the
/// working directory. Only a missing explicit file is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if !default.exists() {
                log::debug!("no {} found, using default settings", DEFAULT_SETTINGS_FILE);
                return Ok(Settings::default());
            }
            default
        }
    };

    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let settings = parse_settings(&content).map_err(|e| match e {
        Error::Parse { message, .. } => Error::Parse {
            what: format!("settings {}", path.display()),
            message,
        },
        other => other,
    })?;
    log::debug!("loaded settings from {}", path.display());
    Ok(settings)
}
