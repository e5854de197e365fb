//! Engine: router registry and request factory
//!
//! An [`Engine`] owns one configuration, the shared permission caches, and
//! the registered [`ModelRouter`]s. It is cheap to clone; clones share
//! state. Routers are immutable once registered; `register` replaces and
//! `unregister` removes them as a whole.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{EngineConfig, EngineSettings};
use crate::context::{EngineShared, RequestContext, RequestId, RequestMeta};
use crate::error::{AccessError, AccessResult};
use crate::router::ModelRouter;

/// Access-control engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
    routers: Arc<RwLock<HashMap<String, Arc<ModelRouter>>>>,
    next_request: Arc<AtomicU64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared::new(config)),
            routers: Arc::new(RwLock::new(HashMap::new())),
            next_request: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.config.settings
    }

    /// Start a request. Its cache entries live until the context is dropped.
    pub fn request(&self, meta: RequestMeta) -> RequestContext {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(request_id = %id, "Request started");
        RequestContext::new(id, meta, Arc::clone(&self.shared))
    }

    /// Register a router under its collection name, replacing any previous one
    pub async fn register(&self, router: ModelRouter) -> Arc<ModelRouter> {
        let name = router.name().to_string();
        let router = Arc::new(router);

        let previous = self
            .routers
            .write()
            .await
            .insert(name.clone(), Arc::clone(&router));

        if previous.is_some() {
            tracing::info!(collection = %name, "Router replaced");
        } else {
            tracing::info!(collection = %name, "Router registered");
        }
        router
    }

    /// Remove a router; returns whether it was registered
    pub async fn unregister(&self, collection: &str) -> bool {
        let removed = self.routers.write().await.remove(collection).is_some();
        if removed {
            tracing::info!(collection = %collection, "Router unregistered");
        }
        removed
    }

    /// Router for `collection`
    pub async fn router(&self, collection: &str) -> AccessResult<Arc<ModelRouter>> {
        self.routers
            .read()
            .await
            .get(collection)
            .cloned()
            .ok_or_else(|| AccessError::UnknownCollection(collection.to_string()))
    }

    /// Registered collection names, sorted
    pub async fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live cache entries (global, document)
    pub fn cache_sizes(&self) -> (usize, usize) {
        (
            self.shared.global_cache.size(),
            self.shared.document_entries(),
        )
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnginePresets;

    fn router(name: &str) -> ModelRouter {
        ModelRouter::builder(name).build().unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let engine = Engine::new(EnginePresets::testing());
        engine.register(router("users")).await;
        engine.register(router("posts")).await;

        assert_eq!(engine.collections().await, vec!["posts", "users"]);
        assert_eq!(engine.router("users").await.unwrap().name(), "users");
        assert!(matches!(
            engine.router("comments").await,
            Err(AccessError::UnknownCollection(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister() {
        let engine = Engine::new(EnginePresets::testing());
        engine.register(router("users")).await;

        assert!(engine.unregister("users").await);
        assert!(!engine.unregister("users").await);
        assert!(engine.collections().await.is_empty());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let engine = Engine::new(EnginePresets::testing());
        let a = engine.request(RequestMeta::new());
        let b = engine.clone().request(RequestMeta::new());
        assert_ne!(a.id(), b.id());
    }
}
