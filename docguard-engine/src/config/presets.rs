//! Engine configuration bundle and presets

use std::path::PathBuf;
use std::sync::Arc;

use super::settings::EngineSettings;
use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::permissions::{GlobalPermissionsResolver, UserRecordPermissions};

/// Field of the user record read by the default resolver
pub const DEFAULT_PERMISSIONS_FIELD: &str = "permissions";

/// Everything an engine needs besides its routers
#[derive(Clone)]
pub struct EngineConfig {
    pub global_resolver: Arc<dyn GlobalPermissionsResolver>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: EngineSettings,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    pub fn new(
        global_resolver: impl GlobalPermissionsResolver + 'static,
        audit: impl AuditSink + 'static,
        settings: EngineSettings,
    ) -> Self {
        Self {
            global_resolver: Arc::new(global_resolver),
            audit: Arc::new(audit),
            settings,
        }
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for engine configurations
pub struct EngineConfigBuilder {
    global_resolver: Option<Arc<dyn GlobalPermissionsResolver>>,
    audit: Option<Arc<dyn AuditSink>>,
    settings: EngineSettings,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            global_resolver: None,
            audit: None,
            settings: EngineSettings::default(),
        }
    }

    /// Set the global permissions resolver
    pub fn global_resolver(mut self, resolver: impl GlobalPermissionsResolver + 'static) -> Self {
        self.global_resolver = Some(Arc::new(resolver));
        self
    }

    /// Set an already shared resolver (e.g. from [`global_resolver_fn`](crate::global_resolver_fn))
    pub fn shared_global_resolver(mut self, resolver: Arc<dyn GlobalPermissionsResolver>) -> Self {
        self.global_resolver = Some(resolver);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Set an audit sink the caller keeps a handle to
    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the configuration.
    ///
    /// Without a resolver, global permissions are read from the
    /// `permissions` field of the resolved user record. Without an audit
    /// sink, events are discarded.
    pub fn build(self) -> Result<EngineConfig, PresetError> {
        self.settings
            .validate()
            .map_err(|e| PresetError::InvalidConfig(e.to_string()))?;

        Ok(EngineConfig {
            global_resolver: self
                .global_resolver
                .unwrap_or_else(|| Arc::new(UserRecordPermissions::new(DEFAULT_PERMISSIONS_FIELD))),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            settings: self.settings,
        })
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for preset initialization
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common use cases
pub struct EnginePresets;

impl EnginePresets {
    /// Testing mode
    ///
    /// - Permissions from the user record's `permissions` field
    /// - In-memory audit
    /// - Default settings
    pub fn testing() -> EngineConfig {
        EngineConfig {
            global_resolver: Arc::new(UserRecordPermissions::new(DEFAULT_PERMISSIONS_FIELD)),
            audit: Arc::new(MemoryAuditSink::new()),
            settings: EngineSettings::default(),
        }
    }

    /// Production mode
    ///
    /// - Permissions from the user record's `permissions` field
    /// - JSON Lines audit under the platform data directory
    /// - Denied reads reported as not-found
    pub fn production(app_name: &str) -> Result<EngineConfig, PresetError> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(app_name);

        let audit = FileAuditSink::new(data_dir.join("audit.jsonl"))
            .map_err(|e| PresetError::AuditInit(e.to_string()))?;

        let mut settings = EngineSettings::default();
        settings.status.hide_denied_reads = true;

        Ok(EngineConfig {
            global_resolver: Arc::new(UserRecordPermissions::new(DEFAULT_PERMISSIONS_FIELD)),
            audit: Arc::new(audit),
            settings,
        })
    }
}
