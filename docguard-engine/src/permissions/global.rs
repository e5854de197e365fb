//! Global permissions and their resolver

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::audit;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};

/// Caller-wide capability set, immutable for the lifetime of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalPermissions {
    /// Every capability is present
    AllowAll,
    /// Named capabilities with explicit values
    Flags(BTreeMap<String, bool>),
    /// Present tags are true, absent tags are false
    Tags(BTreeSet<String>),
}

impl GlobalPermissions {
    /// No capabilities at all
    pub fn none() -> Self {
        GlobalPermissions::Flags(BTreeMap::new())
    }

    pub fn allow_all() -> Self {
        GlobalPermissions::AllowAll
    }

    /// Build from name/value pairs
    pub fn flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        GlobalPermissions::Flags(flags.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build from a list of present tags
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GlobalPermissions::Tags(tags.into_iter().map(Into::into).collect())
    }

    /// Interpret a JSON value.
    ///
    /// `true` grants everything, `false`/`null` grant nothing, an array is a
    /// tag list (non-string entries ignored), and an object maps names to
    /// values read by truthiness.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(true) => GlobalPermissions::AllowAll,
            Value::Array(items) => {
                GlobalPermissions::tags(items.iter().filter_map(Value::as_str))
            }
            Value::Object(map) => {
                GlobalPermissions::flags(map.iter().map(|(k, v)| (k.as_str(), truthy(v))))
            }
            _ => GlobalPermissions::none(),
        }
    }

    /// Whether the capability `name` is present and true
    pub fn has(&self, name: &str) -> bool {
        match self {
            GlobalPermissions::AllowAll => true,
            GlobalPermissions::Flags(flags) => flags.get(name).copied().unwrap_or(false),
            GlobalPermissions::Tags(tags) => tags.contains(name),
        }
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, GlobalPermissions::AllowAll)
    }
}

impl Default for GlobalPermissions {
    fn default() -> Self {
        Self::none()
    }
}

/// JavaScript-style truthiness, used when permissions come from loose JSON
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Produces the caller's global permissions from request context.
///
/// Called at most once per request; the engine caches the result under the
/// request id. An error means the identity could not be established and the
/// request is denied with a server-side failure.
#[async_trait]
pub trait GlobalPermissionsResolver: Send + Sync {
    async fn resolve(&self, request: &RequestContext) -> anyhow::Result<GlobalPermissions>;
}

/// Resolver that returns the same permissions for every request
#[derive(Debug, Clone)]
pub struct StaticGlobalPermissions(pub GlobalPermissions);

#[async_trait]
impl GlobalPermissionsResolver for StaticGlobalPermissions {
    async fn resolve(&self, _request: &RequestContext) -> anyhow::Result<GlobalPermissions> {
        Ok(self.0.clone())
    }
}

/// Reads permissions from a field of the resolved user record.
///
/// Anonymous callers, and users without the field, get no capabilities.
#[derive(Debug, Clone)]
pub struct UserRecordPermissions {
    field: String,
}

impl UserRecordPermissions {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl GlobalPermissionsResolver for UserRecordPermissions {
    async fn resolve(&self, request: &RequestContext) -> anyhow::Result<GlobalPermissions> {
        Ok(request
            .user()
            .and_then(|user| user.get(&self.field))
            .map(GlobalPermissions::from_value)
            .unwrap_or_default())
    }
}

struct FnGlobalResolver<F>(F);

#[async_trait]
impl<F> GlobalPermissionsResolver for FnGlobalResolver<F>
where
    F: Fn(&RequestContext) -> anyhow::Result<GlobalPermissions> + Send + Sync,
{
    async fn resolve(&self, request: &RequestContext) -> anyhow::Result<GlobalPermissions> {
        (self.0)(request)
    }
}

/// Wrap a synchronous closure as a resolver
pub fn global_resolver_fn<F>(f: F) -> Arc<dyn GlobalPermissionsResolver>
where
    F: Fn(&RequestContext) -> anyhow::Result<GlobalPermissions> + Send + Sync + 'static,
{
    Arc::new(FnGlobalResolver(f))
}

/// Resolve the request's global permissions, consulting the cache first
pub(crate) async fn resolve_cached(request: &RequestContext) -> AccessResult<Arc<GlobalPermissions>> {
    let shared = request.shared();
    if let Some(cached) = shared.global_cache.get(&request.id()) {
        return Ok(cached);
    }

    match shared.config.global_resolver.resolve(request).await {
        Ok(permissions) => {
            debug!(request_id = %request.id(), allow_all = permissions.is_allow_all(), "Global permissions resolved");
            // Concurrent resolutions within one request converge on the first stored value
            Ok(shared
                .global_cache
                .get_or_insert(request.id(), Arc::new(permissions)))
        }
        Err(e) => {
            error!(request_id = %request.id(), error = %e, "Global permissions resolver failed");
            request.audit(audit::identity_resolution_failed(&e.to_string()));
            Err(AccessError::IdentityResolution(e))
        }
    }
}
