//! Request-scoped context
//!
//! A [`RequestContext`] is created once per incoming request by
//! [`Engine::request`](crate::Engine::request). It carries the caller's
//! request metadata, memoizes the resolved global permissions, and owns the
//! request's slice of the shared caches: dropping it evicts every entry it
//! created.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use docguard_api::Fingerprint;
use serde_json::Value;

use crate::audit::AuditEvent;
use crate::cache::Cache;
use crate::config::{EngineConfig, EngineSettings};
use crate::error::AccessResult;
use crate::permissions::{self, DocumentPermissions, DocumentPermissionsResolver, GlobalPermissions};

/// Unique identifier of one request within an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Document permissions of one request, keyed by (schema scope, content)
pub(crate) type RequestDocuments = Cache<(String, Fingerprint), Arc<DocumentPermissions>>;

/// State shared by every request of one engine
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub global_cache: Cache<RequestId, Arc<GlobalPermissions>>,
    /// One entry per live request; eviction is a single delete
    pub document_cache: Cache<RequestId, Arc<RequestDocuments>>,
}

impl EngineShared {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            global_cache: Cache::new(),
            document_cache: Cache::new(),
        }
    }

    /// Document cache of `request`, created on first use
    pub fn documents(&self, request: RequestId) -> Arc<RequestDocuments> {
        match self.document_cache.get(&request) {
            Some(documents) => documents,
            None => self
                .document_cache
                .get_or_insert(request, Arc::new(RequestDocuments::new())),
        }
    }

    /// Document permission entries across live requests
    pub fn document_entries(&self) -> usize {
        self.document_cache.values().iter().map(|d| d.size()).sum()
    }
}

/// What the routing layer knows about the caller
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Request headers, keys lowercased
    pub headers: BTreeMap<String, String>,
    /// Resolved user record, if the caller is authenticated
    pub user: Option<Value>,
    /// Free-form attributes set by middleware
    pub attributes: BTreeMap<String, Value>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header (name is lowercased)
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the resolved user record
    pub fn user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    /// Set a middleware attribute
    pub fn attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Per-request handle passed to every rule, filter, and hook invocation
pub struct RequestContext {
    id: RequestId,
    meta: RequestMeta,
    shared: Arc<EngineShared>,
}

impl RequestContext {
    pub(crate) fn new(id: RequestId, meta: RequestMeta, shared: Arc<EngineShared>) -> Self {
        Self { id, meta, shared }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Resolved user record, if any
    pub fn user(&self) -> Option<&Value> {
        self.meta.user.as_ref()
    }

    /// Id of the resolved user record (`_id` or `id`), as a string
    pub fn user_id(&self) -> Option<String> {
        let user = self.user()?;
        let id = user.get("_id").or_else(|| user.get("id"))?;
        match id {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.meta
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.meta.attributes.get(name)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.config.settings
    }

    /// Caller's global permissions, resolved at most once per request
    pub async fn global_permissions(&self) -> AccessResult<Arc<GlobalPermissions>> {
        permissions::global::resolve_cached(self).await
    }

    /// Document permissions for `document`, resolved at most once per
    /// document content and schema scope within this request
    pub async fn document_permissions(
        &self,
        scope: &str,
        resolver: Option<&Arc<dyn DocumentPermissionsResolver>>,
        document: &Value,
        global: &GlobalPermissions,
    ) -> AccessResult<Arc<DocumentPermissions>> {
        permissions::document::resolve_cached(self, scope, resolver, document, global).await
    }

    pub(crate) fn shared(&self) -> &EngineShared {
        &self.shared
    }

    /// Record an audit event; sink failures are logged, never propagated
    pub(crate) fn audit(&self, event: AuditEvent) {
        let event = event.with_request(self.id);
        if let Err(e) = self.shared.config.audit.record(event) {
            tracing::warn!(request_id = %self.id, error = %e, "Failed to record audit event");
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        let id = self.id;
        self.shared.global_cache.delete(&id);
        let documents = self.shared.document_cache.delete(&id);
        tracing::trace!(request_id = %id, documents, "Request cache entries released");
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
