//! # docguard: field- and document-level access control
//!
//! Declarative access control for document-database CRUD. For each action
//! the engine decides, before storage is touched, whether the action is
//! allowed (route guard), which documents are reachable (base filter), and
//! which fields of each document the caller may see or write (field
//! schema). It never talks to the database: it hands back the filter to run
//! and masks what comes back.
//!
//! ## Core Principles
//!
//! - **Default deny**: an undeclared rule, filter, or field denies
//! - **Storage-agnostic**: filters are structured clauses, masking works on JSON
//! - **Broken is not denied**: a failing rule is an evaluation error, never a silent deny
//! - **Request-scoped caching**: permissions are resolved once per request and released with it
//!
//! ## Quick Start
//!
//! ```rust
//! use docguard::{
//!     dispatch, ActionFilters, ActionRequest, ActionRules, BaseFilterConfig, Engine,
//!     EnginePresets, FieldRule, FieldSchema, ModelRouter, RequestMeta, RouteGuardConfig,
//! };
//! use docguard::Action;
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
//!                     .field("email", FieldRule::readable("isAdmin")),
//!             )
//!             .guard(RouteGuardConfig::new(ActionRules::new().list(true)))
//!             .filters(BaseFilterConfig::new(ActionFilters::new().list(true)))
//!             .build()
//!             .unwrap(),
//!     )
//!     .await;
//!
//! let ctx = engine.request(RequestMeta::new().user(json!({"_id": "u1", "permissions": {}})));
//!
//! // Before storage: what to query
//! let planned = dispatch(&users, &ctx, ActionRequest::new(Action::List)).await;
//! assert_eq!(planned.filter, Some(json!({})));
//!
//! // After storage: what the caller may see
//! let mut request = ActionRequest::new(Action::List);
//! request.documents = Some(vec![json!({"name": "Ann", "email": "ann@example.com"})]);
//! let masked = dispatch(&users, &ctx, request).await;
//! assert_eq!(masked.documents, Some(vec![json!({"name": "Ann"})]));
//! # }
//! ```

pub mod dispatch;
pub mod response;
pub mod tracing_support;

pub use dispatch::{dispatch, dispatch_to};
pub use response::IntoResponse;

// Re-export tracing itself (required for #[instrument] in integrator code)
pub use tracing_support::tracing;

#[cfg(feature = "subscriber")]
pub use tracing_support::{init_subscriber, init_subscriber_with_config, TracingConfig, TracingFormat};

pub use docguard_api::{
    Action, ActionRequest, ActionResponse, ErrorBody, ErrorKind, Fingerprint,
};
pub use docguard_engine::{
    audit, document_resolver_fn, global_resolver_fn, identifier_fn, AccessError, AccessResult,
    ActionFilters, ActionRules, AuditEvent, AuditEventType, AuditSink, BaseFilter,
    BaseFilterConfig, DocumentPermissions, DocumentPermissionsResolver, Engine, EngineConfig,
    EngineConfigBuilder, EnginePresets, EngineSettings, EvaluationError, FieldRule, FieldSchema,
    FileAuditSink, FilterContext, FilterOutcome, FilterProvider, GlobalPermissions,
    GlobalPermissionsResolver, HookContext, Hooks, IdField, IdentifierResolver, MemoryAuditSink,
    ModelRouter, ModelRouterBuilder, NullAuditSink, QueryFilter, QueryPlan, QueryRequest,
    RequestContext, RequestMeta, RouteGuardConfig, Rule, RuleContext, RuleOutcome, RulePredicate,
    StaticGlobalPermissions, StatusPolicy, UserRecordPermissions, ValidationOutcome, WritePlan,
};
