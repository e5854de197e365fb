//! Document-scoped permissions and their resolver

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use docguard_api::Fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::GlobalPermissions;
use crate::context::RequestContext;
use crate::error::{AccessResult, EvaluationError};

/// Flags computed for one document instance (e.g. `edit.role`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPermissions(BTreeMap<String, bool>);

impl DocumentPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a flag
    pub fn with(mut self, name: impl Into<String>, value: bool) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }

    /// Flag value; absent flags are false
    pub fn get(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object form, used when attaching permissions to output documents
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::Bool(*v)))
                .collect(),
        )
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for DocumentPermissions {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Computes document-scoped flags.
///
/// Must be a function of its inputs (plus ambient request state such as the
/// caller id); the engine caches its result per document content.
#[async_trait]
pub trait DocumentPermissionsResolver: Send + Sync {
    async fn resolve(
        &self,
        document: &Value,
        global: &GlobalPermissions,
        request: &RequestContext,
    ) -> anyhow::Result<DocumentPermissions>;
}

struct FnDocumentResolver<F>(F);

#[async_trait]
impl<F> DocumentPermissionsResolver for FnDocumentResolver<F>
where
    F: Fn(&Value, &GlobalPermissions, &RequestContext) -> DocumentPermissions + Send + Sync,
{
    async fn resolve(
        &self,
        document: &Value,
        global: &GlobalPermissions,
        request: &RequestContext,
    ) -> anyhow::Result<DocumentPermissions> {
        Ok((self.0)(document, global, request))
    }
}

/// Wrap an infallible synchronous closure as a resolver
pub fn document_resolver_fn<F>(f: F) -> Arc<dyn DocumentPermissionsResolver>
where
    F: Fn(&Value, &GlobalPermissions, &RequestContext) -> DocumentPermissions
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnDocumentResolver(f))
}

/// Resolve document permissions, caching by (request, scope, content)
pub(crate) async fn resolve_cached(
    request: &RequestContext,
    scope: &str,
    resolver: Option<&Arc<dyn DocumentPermissionsResolver>>,
    document: &Value,
    global: &GlobalPermissions,
) -> AccessResult<Arc<DocumentPermissions>> {
    let Some(resolver) = resolver else {
        return Ok(Arc::new(DocumentPermissions::new()));
    };

    let fingerprint = Fingerprint::of(document);
    let key = (scope.to_string(), fingerprint);
    let cache = request.shared().documents(request.id());
    if let Some(cached) = cache.get(&key) {
        return Ok(cached);
    }

    trace!(request_id = %request.id(), scope, document = %fingerprint.short(), "Resolving document permissions");
    let permissions = resolver
        .resolve(document, global, request)
        .await
        .map_err(|e| EvaluationError::new(format!("document permissions of '{}'", scope), e))?;

    Ok(cache.get_or_insert(key, Arc::new(permissions)))
}
