//! docguard-engine: Field- and document-level access control for document CRUD
//!
//! For each operation the engine decides, before storage is touched:
//!
//! 1. whether the action is allowed at all (route guard),
//! 2. which documents are reachable (base filter merged with the caller's filter),
//! 3. which fields of each document may be listed, read, updated, or created
//!    (field mask), recursively through sub-document schemas.
//!
//! # Example
//!
//! ```rust
//! use docguard_engine::{
//!     ActionFilters, ActionRules, BaseFilterConfig, Engine, EnginePresets, FieldRule,
//!     FieldSchema, ModelRouter, QueryRequest, RequestMeta, RouteGuardConfig,
//! };
//! use docguard_api::Action;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = Engine::new(EnginePresets::testing());
//! let users = engine
//!     .register(
//!         ModelRouter::builder("users")
//!             .schema(
//!                 FieldSchema::new()
//!                     .field("name", FieldRule::readable(true))
//!                     .field("role", FieldRule::new().list("isAdmin")),
//!             )
//!             .guard(RouteGuardConfig::new(ActionRules::new().list(true)))
//!             .filters(BaseFilterConfig::new(ActionFilters::new().list(true)))
//!             .build()
//!             .unwrap(),
//!     )
//!     .await;
//!
//! let ctx = engine.request(RequestMeta::new().user(json!({"_id": "u1", "permissions": {}})));
//! let plan = users.plan_query(&ctx, QueryRequest::new(Action::List)).await.unwrap();
//! assert_eq!(plan.filter.clause(), Some(&json!({})));
//!
//! let docs = users
//!     .mask_documents(&ctx, plan.effective_action, vec![json!({"name": "a", "role": "user"})])
//!     .await
//!     .unwrap();
//! assert_eq!(docs, vec![json!({"name": "a"})]);
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod guard;
pub mod hooks;
pub mod permissions;
pub mod registry;
pub mod router;
pub mod rule;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditEvent, AuditEventType, AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
pub use cache::Cache;
pub use config::{
    EngineConfig, EngineConfigBuilder, EnginePresets, EngineSettings, PresetError, SettingsError,
    StatusPolicy,
};
pub use context::{RequestContext, RequestId, RequestMeta};
pub use error::{AccessError, AccessResult, EvaluationError};
pub use filter::{
    ActionFilters, BaseFilter, BaseFilterConfig, FilterContext, FilterOutcome, FilterProvider,
    QueryFilter,
};
pub use guard::{ActionRules, RouteGuardConfig};
pub use hooks::{HookContext, Hooks, ValidationOutcome, Validator};
pub use permissions::{
    document_resolver_fn, global_resolver_fn, DocumentPermissions, DocumentPermissionsResolver,
    GlobalPermissions, GlobalPermissionsResolver, StaticGlobalPermissions, UserRecordPermissions,
};
pub use registry::Engine;
pub use router::{
    identifier_fn, IdField, IdentifierResolver, ModelRouter, ModelRouterBuilder, QueryPlan,
    QueryRequest, WritePlan,
};
pub use rule::{Rule, RuleContext, RuleOutcome, RulePredicate};
pub use schema::{apply_mask, FieldMask, FieldPath, FieldRule, FieldSchema, MaskOutcome, SchemaWalker};

pub use docguard_api::{Action, Fingerprint};
