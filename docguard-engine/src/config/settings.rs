//! Policy settings

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// How denials are reported at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    /// Status for a route guard denial (401 or 403)
    pub guard_denied: u16,
    /// Report a denied read as not-found, hiding whether the document exists
    pub hide_denied_reads: bool,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            guard_denied: 403,
            hide_denied_reads: false,
        }
    }
}

/// Engine-wide policy knobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// When a read is denied by its guard, retry with list semantics
    pub read_falls_back_to_list: bool,
    /// Mask the documents of a list concurrently
    pub parallel_masking: bool,
    /// Upper bound applied to caller-supplied list limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_hard_limit: Option<u64>,
    /// Output key under which document permissions are attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions_field: Option<String>,
    pub status: StatusPolicy,
}

impl EngineSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let reader = BufReader::new(File::open(path)?);
        let settings: Self = serde_json::from_reader(reader)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.list_hard_limit == Some(0) {
            return Err(SettingsError::Invalid("list_hard_limit must be positive".into()));
        }
        if matches!(&self.permissions_field, Some(field) if field.is_empty()) {
            return Err(SettingsError::Invalid("permissions_field must not be empty".into()));
        }
        if !(400..500).contains(&self.status.guard_denied) {
            return Err(SettingsError::Invalid(format!(
                "status.guard_denied must be a 4xx status, got {}",
                self.status.guard_denied
            )));
        }
        Ok(())
    }

    /// Caller limit clamped to the hard limit
    pub fn clamp_limit(&self, requested: Option<u64>) -> Option<u64> {
        match (requested, self.list_hard_limit) {
            (Some(requested), Some(hard)) => Some(requested.min(hard)),
            (None, hard) => hard,
            (requested, None) => requested,
        }
    }
}
