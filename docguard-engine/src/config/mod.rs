//! Engine configuration
//!
//! [`EngineSettings`] holds the policy knobs and can be loaded from JSON.
//! [`EngineConfig`] bundles the settings with the global permissions
//! resolver and the audit sink; it is assembled once and owned by an
//! [`Engine`](crate::Engine). Nothing here is process-global, so several
//! engines with different configurations can coexist.

pub mod presets;
pub mod settings;

pub use presets::{EngineConfig, EngineConfigBuilder, EnginePresets, PresetError};
pub use settings::{EngineSettings, SettingsError, StatusPolicy};
