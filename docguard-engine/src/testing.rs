//! Shared fixtures for unit tests

use serde_json::json;

use crate::config::EnginePresets;
use crate::context::RequestMeta;
use crate::registry::Engine;

pub fn test_engine() -> Engine {
    Engine::new(EnginePresets::testing())
}

/// Authenticated caller without capabilities
pub fn guest() -> RequestMeta {
    RequestMeta::new().user(json!({"_id": "guest", "permissions": {}}))
}

pub fn admin() -> RequestMeta {
    RequestMeta::new().user(json!({"_id": "admin", "permissions": {"isAdmin": true}}))
}
