//! KN-001: Shared types — resource kinds, error policy, run report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Resources
// ============================================================================

/// Resource kind keyword (`type:` in a recipe block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Disk image containing an app bundle or installer package.
    Dmg,
    /// Flat installer package.
    Pkg,
    /// Inline shell script.
    Shell,
    /// Zip or tarball unpacked to a directory.
    #[serde(alias = "zip")]
    Archive,
    /// Git checkout.
    Git,
}

impl ResourceKind {
    /// Parse a recipe keyword. `zip` is accepted for `archive`.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "dmg" => Some(Self::Dmg),
            "pkg" => Some(Self::Pkg),
            "shell" => Some(Self::Shell),
            "archive" | "zip" => Some(Self::Archive),
            "git" => Some(Self::Git),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dmg => write!(f, "dmg"),
            Self::Pkg => write!(f, "pkg"),
            Self::Shell => write!(f, "shell"),
            Self::Archive => write!(f, "archive"),
            Self::Git => write!(f, "git"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// What the scheduler does when a bake fails.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure, mark the resource baked, keep going.
    #[default]
    Continue,
    /// Stop the run at the first failed bake.
    Abort,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Resources whose bake succeeded, in bake order.
    pub baked: Vec<String>,
    /// Resources a guard held back. Each appears once.
    pub skipped: Vec<String>,
    /// Resources whose bake failed, with the error text.
    pub failed: Vec<(String, String)>,
    pub total_duration: Duration,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub(crate) fn record_skip(&mut self, name: &str) {
        if !self.skipped.iter().any(|s| s == name) {
            self.skipped.push(name.to_string());
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baked, {} skipped, {} failed in {:.1}s",
            self.baked.len(),
            self.skipped.len(),
            self.failed.len(),
            self.total_duration.as_secs_f64()
        )
    }
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a scalar YAML value to the string a template substitutes.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
