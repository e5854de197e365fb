//! Model router: the per-collection orchestrator
//!
//! A [`ModelRouter`] owns the field schema, route guard, base filters,
//! identifier resolver, and hooks of one collection. The request-handling
//! layer calls it twice around storage:
//!
//! 1. before storage: [`ModelRouter::plan_query`] (list, read, update,
//!    delete, count, distinct) or [`ModelRouter::prepare_create`] /
//!    [`ModelRouter::prepare_update`] / [`ModelRouter::prepare_update_query`]
//!    for writes;
//! 2. after storage: [`ModelRouter::mask_documents`] /
//!    [`ModelRouter::mask_document`] for read output.
//!
//! The route guard always runs first; a denial short-circuits before any
//! base filter or mask work.

mod subs;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use docguard_api::Action;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::audit;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult, EvaluationError};
use crate::filter::{BaseFilterConfig, FilterOutcome, QueryFilter};
use crate::guard::RouteGuardConfig;
use crate::hooks::{HookContext, Hooks};
use crate::permissions::{DocumentPermissions, DocumentPermissionsResolver, GlobalPermissions};
use crate::rule::RuleContext;
use crate::schema::{FieldSchema, SchemaWalker};

// ============================================================================
// Identifier resolution
// ============================================================================

/// Maps an external identifier to a lookup clause
pub trait IdentifierResolver: Send + Sync {
    fn resolve(&self, id: &str, request: &RequestContext) -> anyhow::Result<Value>;
}

/// Looks documents up by equality on one field
#[derive(Debug, Clone)]
pub struct IdField(pub String);

impl Default for IdField {
    fn default() -> Self {
        Self("_id".to_string())
    }
}

impl IdentifierResolver for IdField {
    fn resolve(&self, id: &str, _request: &RequestContext) -> anyhow::Result<Value> {
        let mut clause = Map::new();
        clause.insert(self.0.clone(), Value::String(id.to_string()));
        Ok(Value::Object(clause))
    }
}

struct FnIdentifier<F>(F);

impl<F> IdentifierResolver for FnIdentifier<F>
where
    F: Fn(&str, &RequestContext) -> anyhow::Result<Value> + Send + Sync,
{
    fn resolve(&self, id: &str, request: &RequestContext) -> anyhow::Result<Value> {
        (self.0)(id, request)
    }
}

/// Wrap a closure as an identifier resolver
pub fn identifier_fn<F>(f: F) -> Arc<dyn IdentifierResolver>
where
    F: Fn(&str, &RequestContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnIdentifier(f))
}

// ============================================================================
// Plans
// ============================================================================

/// Query-shaped request (everything except create)
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub action: Action,
    /// Caller-supplied filter clause
    pub filter: Option<Value>,
    /// External identifier for single-document actions
    pub id: Option<String>,
    pub limit: Option<u64>,
    pub select: Option<Vec<String>>,
    /// Target field of a distinct
    pub field: Option<String>,
}

impl QueryRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            filter: None,
            id: None,
            limit: None,
            select: None,
            field: None,
        }
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// What the storage layer should execute
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    /// Action the caller asked for
    pub action: Action,
    /// Action whose rules apply; `List` for a read that fell back to list
    pub effective_action: Action,
    pub filter: QueryFilter,
    pub limit: Option<u64>,
    pub select: Option<Vec<String>>,
    pub field: Option<String>,
}

impl QueryPlan {
    /// Whether storage can be skipped because nothing is reachable
    pub fn is_empty(&self) -> bool {
        self.filter.is_match_none()
    }
}

/// Masked write payload ready for storage
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub payload: Value,
    /// Paths removed by the field mask, for diagnostics only
    pub dropped: Vec<String>,
    /// Clause bounding an update; `None` for inserts
    pub filter: Option<Value>,
}

// ============================================================================
// Router
// ============================================================================

/// Access control for one collection
pub struct ModelRouter {
    name: String,
    schema: FieldSchema,
    guard: RouteGuardConfig,
    filters: BaseFilterConfig,
    identifier: Arc<dyn IdentifierResolver>,
    hooks: Hooks,
    /// Sub-collection name -> schema field holding its elements
    sub_collections: BTreeMap<String, String>,
}

impl ModelRouter {
    pub fn builder(name: impl Into<String>) -> ModelRouterBuilder {
        ModelRouterBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn sub_collections(&self) -> impl Iterator<Item = &str> {
        self.sub_collections.keys().map(String::as_str)
    }

    /// Resolve global permissions and run the route guard.
    ///
    /// On denial the decision is logged and audited and `GuardDenied` is
    /// returned; no other stage runs.
    #[instrument(
        level = "debug",
        skip(self, ctx),
        fields(collection = %self.name, request_id = %ctx.id())
    )]
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        action: Action,
        sub_collection: Option<&str>,
    ) -> AccessResult<Arc<GlobalPermissions>> {
        self.authorize_inner(ctx, action, sub_collection)
            .await
            .map_err(|e| self.observe(ctx, action, e))
    }

    async fn authorize_inner(
        &self,
        ctx: &RequestContext,
        action: Action,
        sub_collection: Option<&str>,
    ) -> AccessResult<Arc<GlobalPermissions>> {
        let global = ctx.global_permissions().await?;
        if self.check_guard(ctx, &global, action, sub_collection).await? {
            Ok(global)
        } else {
            Err(self.deny(ctx, action, sub_collection))
        }
    }

    /// Plan a query-shaped action before storage is touched
    #[instrument(
        level = "debug",
        skip(self, ctx, query),
        fields(collection = %self.name, action = %query.action, request_id = %ctx.id())
    )]
    pub async fn plan_query(&self, ctx: &RequestContext, query: QueryRequest) -> AccessResult<QueryPlan> {
        let action = query.action;
        self.plan_query_inner(ctx, query)
            .await
            .map_err(|e| self.observe(ctx, action, e))
    }

    async fn plan_query_inner(&self, ctx: &RequestContext, query: QueryRequest) -> AccessResult<QueryPlan> {
        let action = query.action;
        if action == Action::Create {
            return Err(AccessError::Config(
                "create has no query; use prepare_create".to_string(),
            ));
        }

        let global = ctx.global_permissions().await?;
        let effective_action = if self.check_guard(ctx, &global, action, None).await? {
            action
        } else if action == Action::Read
            && ctx.settings().read_falls_back_to_list
            && self.check_guard(ctx, &global, Action::List, None).await?
        {
            debug!(collection = %self.name, "Read denied; falling back to list visibility");
            Action::List
        } else {
            return Err(self.deny(ctx, action, None));
        };

        // Count and distinct are filtered as list
        let filter_action = if effective_action == Action::Read {
            Action::Read
        } else {
            effective_action.guard_action()
        };
        let base = self.base_filter(ctx, &global, filter_action, action).await?;
        let mut filter = self.scope(ctx, QueryFilter::merge(base, query.filter), query.id.as_deref())?;

        if action == Action::Distinct {
            let Some(field) = query.field.as_deref() else {
                return Err(AccessError::ValidationFailed {
                    errors: vec!["distinct requires a field".to_string()],
                });
            };
            if !self.field_listable(ctx, &global, field).await? {
                debug!(collection = %self.name, field, "Distinct field is not listable");
                filter = QueryFilter::MatchNone;
            }
        }

        let limit = match action {
            Action::List | Action::Distinct => ctx.settings().clamp_limit(query.limit),
            Action::Read if effective_action == Action::List => ctx.settings().clamp_limit(query.limit),
            _ => query.limit,
        };
        let select = query.select.map(|fields| {
            fields
                .into_iter()
                .filter(|f| self.schema.get(top_level(f)).is_some())
                .collect()
        });

        Ok(QueryPlan {
            collection: self.name.clone(),
            action,
            effective_action,
            filter,
            limit,
            select,
            field: query.field,
        })
    }

    /// Mask storage results for output.
    ///
    /// `action` is the plan's effective action. Documents are masked in
    /// order; with `parallel_masking` they are masked concurrently and the
    /// order is preserved.
    #[instrument(
        level = "debug",
        skip(self, ctx, documents),
        fields(collection = %self.name, count = documents.len(), request_id = %ctx.id())
    )]
    pub async fn mask_documents(
        &self,
        ctx: &RequestContext,
        action: Action,
        documents: Vec<Value>,
    ) -> AccessResult<Vec<Value>> {
        self.mask_documents_inner(ctx, action, documents)
            .await
            .map_err(|e| self.observe(ctx, action, e))
    }

    async fn mask_documents_inner(
        &self,
        ctx: &RequestContext,
        action: Action,
        documents: Vec<Value>,
    ) -> AccessResult<Vec<Value>> {
        let field_action = output_action(action)?;
        let global = ctx.global_permissions().await?;

        let masked = if ctx.settings().parallel_masking {
            futures::future::try_join_all(
                documents
                    .iter()
                    .map(|doc| self.mask_output(ctx, &global, doc, field_action)),
            )
            .await?
        } else {
            let mut masked = Vec::with_capacity(documents.len());
            for doc in &documents {
                masked.push(self.mask_output(ctx, &global, doc, field_action).await?);
            }
            masked
        };

        match &self.hooks.decorate_all {
            Some(hook) => {
                let hook_ctx = HookContext {
                    request: ctx,
                    global: &global,
                    action,
                    document_permissions: None,
                    existing: None,
                };
                hook.decorate_all(masked, &hook_ctx)
                    .await
                    .map_err(|e| EvaluationError::new("decorate_all hook", e).into())
            }
            None => Ok(masked),
        }
    }

    /// Mask a single fetched document; `None` means storage found nothing
    pub async fn mask_document(
        &self,
        ctx: &RequestContext,
        action: Action,
        document: Option<Value>,
    ) -> AccessResult<Value> {
        let document = document.ok_or(AccessError::NotFound)?;
        let result: AccessResult<Value> = async {
            let field_action = output_action(action)?;
            let global = ctx.global_permissions().await?;
            self.mask_output(ctx, &global, &document, field_action).await
        }
        .await;
        result.map_err(|e| self.observe(ctx, action, e))
    }

    /// Guard, mask, prepare, and validate a create payload
    #[instrument(
        level = "debug",
        skip(self, ctx, payload),
        fields(collection = %self.name, request_id = %ctx.id())
    )]
    pub async fn prepare_create(&self, ctx: &RequestContext, payload: Value) -> AccessResult<WritePlan> {
        let global = self.authorize(ctx, Action::Create, None).await?;
        self.prepare_write(ctx, &global, Action::Create, payload, None)
            .await
            .map_err(|e| self.observe(ctx, Action::Create, e))
    }

    /// Guard, mask, prepare, and validate an update payload.
    ///
    /// Field rules and document permissions are evaluated against the
    /// stored document, not the incoming payload.
    #[instrument(
        level = "debug",
        skip(self, ctx, existing, payload),
        fields(collection = %self.name, request_id = %ctx.id())
    )]
    pub async fn prepare_update(
        &self,
        ctx: &RequestContext,
        existing: &Value,
        payload: Value,
    ) -> AccessResult<WritePlan> {
        self.prepare_update_query(ctx, QueryRequest::new(Action::Update), existing, payload)
            .await
    }

    /// [`ModelRouter::prepare_update`] for a targeted update.
    ///
    /// `existing` must pass the update base filter, otherwise the write is
    /// `NotFound`. The returned plan carries the clause storage must apply
    /// to the write: the base filter, the caller's filter, and the
    /// identifier clause for `query.id`.
    #[instrument(
        level = "debug",
        skip(self, ctx, query, existing, payload),
        fields(collection = %self.name, request_id = %ctx.id())
    )]
    pub async fn prepare_update_query(
        &self,
        ctx: &RequestContext,
        query: QueryRequest,
        existing: &Value,
        payload: Value,
    ) -> AccessResult<WritePlan> {
        let result: AccessResult<WritePlan> = async {
            let global = self.authorize_inner(ctx, Action::Update, None).await?;
            let base = self.base_filter(ctx, &global, Action::Update, Action::Update).await?;
            if !QueryFilter::merge(base.clone(), None).matches(existing) {
                debug!(collection = %self.name, "Stored document is outside the update filter");
                return Err(AccessError::NotFound);
            }

            let filter = self.scope(ctx, QueryFilter::merge(base, query.filter), query.id.as_deref())?;
            let mut plan = self
                .prepare_write(ctx, &global, Action::Update, payload, Some(existing))
                .await?;
            plan.filter = filter.into_clause();
            Ok(plan)
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::Update, e))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn check_guard(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        action: Action,
        sub_collection: Option<&str>,
    ) -> AccessResult<bool> {
        self.guard
            .check(action, sub_collection, &RuleContext::new(global, ctx))
            .await
    }

    /// Document permissions of a top-level document of this collection
    async fn root_permissions(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        document: &Value,
    ) -> AccessResult<Arc<DocumentPermissions>> {
        ctx.document_permissions(&self.name, self.schema.resolver(), document, global)
            .await
    }

    /// Base filter for `filter_action`, audited when it denies everything
    async fn base_filter(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        filter_action: Action,
        action: Action,
    ) -> AccessResult<FilterOutcome> {
        let base = self.filters.build(filter_action, None, global, ctx).await?;
        if base.is_deny() {
            debug!(collection = %self.name, %action, "Base filter denies every document");
            ctx.audit(audit::filter_denied(&self.name, action, None));
        }
        Ok(base)
    }

    /// AND the identifier clause for `id` into `filter`
    fn scope(&self, ctx: &RequestContext, filter: QueryFilter, id: Option<&str>) -> AccessResult<QueryFilter> {
        let Some(id) = id else {
            return Ok(filter);
        };
        let clause = self
            .identifier
            .resolve(id, ctx)
            .map_err(|e| EvaluationError::new("identifier resolver", e))?;
        Ok(filter.and(clause))
    }

    fn deny(&self, ctx: &RequestContext, action: Action, sub_collection: Option<&str>) -> AccessError {
        debug!(collection = %self.name, %action, sub_collection, request_id = %ctx.id(), "Route guard denied");
        ctx.audit(audit::guard_denied(&self.name, action, sub_collection));
        AccessError::GuardDenied {
            collection: self.name.clone(),
            action,
            sub_collection: sub_collection.map(String::from),
        }
    }

    /// Log and audit broken rules on their way out
    fn observe(&self, ctx: &RequestContext, action: Action, err: AccessError) -> AccessError {
        if let AccessError::Evaluation(e) = &err {
            warn!(
                collection = %self.name,
                %action,
                request_id = %ctx.id(),
                location = %e.location,
                error = %e.source,
                "Access evaluation failed"
            );
            ctx.audit(audit::evaluation_failed(&e.location, &e.source.to_string()).on(&self.name, action));
        }
        err
    }

    /// Whether `field` is listable without a document (distinct targets)
    async fn field_listable(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        field: &str,
    ) -> AccessResult<bool> {
        let Some(rule) = self.schema.get(top_level(field)) else {
            return Ok(false);
        };
        rule.list
            .evaluate(&RuleContext::new(global, ctx))
            .await
            .map_err(|e| EvaluationError::new(format!("field '{}' (distinct)", field), e).into())
    }

    async fn mask_output(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        document: &Value,
        field_action: Action,
    ) -> AccessResult<Value> {
        let outcome = SchemaWalker::new(ctx, global)
            .compute_mask(&self.schema, &self.name, document, None, field_action)
            .await?;
        let mut output = outcome.apply(document);

        let permissions_field = ctx.settings().permissions_field.as_ref();
        let permissions = if permissions_field.is_some() || self.hooks.decorate.is_some() {
            Some(self.root_permissions(ctx, global, document).await?)
        } else {
            None
        };

        if let (Some(key), Some(permissions), Some(map)) = (permissions_field, &permissions, output.as_object_mut()) {
            map.insert(key.clone(), permissions.to_value());
        }

        match &self.hooks.decorate {
            Some(hook) => {
                let hook_ctx = HookContext {
                    request: ctx,
                    global,
                    action: field_action,
                    document_permissions: permissions.as_deref(),
                    existing: None,
                };
                hook.decorate(output, &hook_ctx)
                    .await
                    .map_err(|e| EvaluationError::new("decorate hook", e).into())
            }
            None => Ok(output),
        }
    }

    async fn prepare_write(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        action: Action,
        payload: Value,
        existing: Option<&Value>,
    ) -> AccessResult<WritePlan> {
        let outcome = SchemaWalker::new(ctx, global)
            .compute_mask(&self.schema, &self.name, &payload, existing, action)
            .await?;
        let masked = outcome.apply(&payload);
        let dropped = self.report_dropped(ctx, action, &outcome.mask.dropped_paths(&payload));

        let permissions = if self.hooks.prepare.is_some() || self.hooks.validate.is_some() {
            let source = existing.filter(|e| e.is_object()).unwrap_or(&payload);
            Some(self.root_permissions(ctx, global, source).await?)
        } else {
            None
        };
        let hook_ctx = HookContext {
            request: ctx,
            global,
            action,
            document_permissions: permissions.as_deref(),
            existing,
        };

        let prepared = match &self.hooks.prepare {
            Some(hook) => hook
                .prepare(masked, &hook_ctx)
                .await
                .map_err(|e| EvaluationError::new("prepare hook", e))?,
            None => masked,
        };

        if let Some(validator) = &self.hooks.validate {
            let errors = validator
                .run(&prepared, &hook_ctx)
                .await
                .map_err(|e| EvaluationError::new("validate hook", e))?;
            if !errors.is_empty() {
                debug!(collection = %self.name, %action, count = errors.len(), "Validation failed");
                ctx.audit(audit::validation_failed(&self.name, action, &errors));
                return Err(AccessError::ValidationFailed { errors });
            }
        }

        Ok(WritePlan {
            payload: prepared,
            dropped,
            filter: None,
        })
    }

    fn report_dropped(&self, ctx: &RequestContext, action: Action, dropped: &[crate::schema::FieldPath]) -> Vec<String> {
        let paths: Vec<String> = dropped.iter().map(ToString::to_string).collect();
        if !paths.is_empty() {
            debug!(collection = %self.name, %action, dropped = ?paths, "Write fields dropped by mask");
            ctx.audit(audit::fields_dropped(&self.name, action, paths.clone()));
        }
        paths
    }
}

impl fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRouter")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("guard", &self.guard)
            .field("filters", &self.filters)
            .field("hooks", &self.hooks)
            .field("sub_collections", &self.sub_collections)
            .finish_non_exhaustive()
    }
}

/// Field action used to mask output; only list-shaped and read actions qualify
fn output_action(action: Action) -> AccessResult<Action> {
    match action.field_action() {
        Some(a @ (Action::List | Action::Read)) => Ok(a),
        _ => Err(AccessError::Config(format!(
            "action '{}' produces no document output",
            action
        ))),
    }
}

fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ModelRouter`]
pub struct ModelRouterBuilder {
    name: String,
    schema: FieldSchema,
    guard: RouteGuardConfig,
    filters: BaseFilterConfig,
    identifier: Arc<dyn IdentifierResolver>,
    hooks: Hooks,
    sub_collections: BTreeMap<String, String>,
}

impl ModelRouterBuilder {
    /// Start a router that denies everything until configured
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: FieldSchema::new(),
            guard: RouteGuardConfig::default(),
            filters: BaseFilterConfig::default(),
            identifier: Arc::new(IdField::default()),
            hooks: Hooks::new(),
            sub_collections: BTreeMap::new(),
        }
    }

    pub fn schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn guard(mut self, guard: RouteGuardConfig) -> Self {
        self.guard = guard;
        self
    }

    pub fn filters(mut self, filters: BaseFilterConfig) -> Self {
        self.filters = filters;
        self
    }

    /// Document permissions resolver of the top-level schema
    pub fn document_permissions(mut self, resolver: Arc<dyn DocumentPermissionsResolver>) -> Self {
        self.schema = self.schema.document_permissions(resolver);
        self
    }

    pub fn identifier(mut self, resolver: Arc<dyn IdentifierResolver>) -> Self {
        self.identifier = resolver;
        self
    }

    /// Look documents up by equality on `field` instead of `_id`
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.identifier = Arc::new(IdField(field.into()));
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Declare a sub-collection stored in the schema field of the same name
    pub fn sub_collection(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let field = name.clone();
        self.sub_collection_at(name, field)
    }

    /// Declare a sub-collection stored in `field`
    pub fn sub_collection_at(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.sub_collections.insert(name.into(), field.into());
        self
    }

    /// Build the router.
    ///
    /// Every sub-collection must name a schema field with a sub-schema.
    pub fn build(self) -> AccessResult<ModelRouter> {
        if self.name.is_empty() {
            return Err(AccessError::Config("collection name must not be empty".to_string()));
        }
        for (sub, field) in &self.sub_collections {
            let has_sub_schema = self
                .schema
                .get(field)
                .map(|rule| rule.sub.is_some())
                .unwrap_or(false);
            if !has_sub_schema {
                return Err(AccessError::Config(format!(
                    "sub-collection '{}' of '{}' needs field '{}' with a sub-schema",
                    sub, self.name, field
                )));
            }
        }

        Ok(ModelRouter {
            name: self.name,
            schema: self.schema,
            guard: self.guard,
            filters: self.filters,
            identifier: self.identifier,
            hooks: self.hooks,
            sub_collections: self.sub_collections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ActionFilters;
    use crate::guard::ActionRules;
    use crate::schema::FieldRule;
    use crate::testing::{admin, guest, test_engine};
    use serde_json::json;

    fn users() -> ModelRouter {
        ModelRouter::builder("users")
            .schema(
                FieldSchema::new()
                    .field("name", FieldRule::readable(true).writable(true))
                    .field("role", FieldRule::new().list("isAdmin").writable("isAdmin")),
            )
            .guard(RouteGuardConfig::new(ActionRules::all(true)))
            .filters(BaseFilterConfig::new(ActionFilters::all(true)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_plan_by_id_uses_identifier_clause() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let plan = users()
            .plan_query(&ctx, QueryRequest::new(Action::Read).id("u1"))
            .await
            .unwrap();
        assert_eq!(plan.filter, QueryFilter::Match(json!({"_id": "u1"})));
        assert_eq!(plan.effective_action, Action::Read);
    }

    #[tokio::test]
    async fn test_custom_id_field() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let router = ModelRouter::builder("users")
            .guard(RouteGuardConfig::new(ActionRules::all(true)))
            .filters(BaseFilterConfig::new(ActionFilters::all(json!({"active": true}))))
            .id_field("slug")
            .build()
            .unwrap();

        let plan = router
            .plan_query(&ctx, QueryRequest::new(Action::Delete).id("ann"))
            .await
            .unwrap();
        assert_eq!(
            plan.filter,
            QueryFilter::Match(json!({"$and": [{"active": true}, {"slug": "ann"}]}))
        );
    }

    #[tokio::test]
    async fn test_caller_and_object_keeps_identifier_clause() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let plan = users()
            .plan_query(
                &ctx,
                QueryRequest::new(Action::Delete).id("u2").filter(json!({"$and": {"x": 1}})),
            )
            .await
            .unwrap();
        assert_eq!(
            plan.filter,
            QueryFilter::Match(json!({"$and": [{"$and": {"x": 1}}, {"_id": "u2"}]}))
        );
    }

    #[tokio::test]
    async fn test_update_is_bounded_by_base_filter() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let router = ModelRouter::builder("users")
            .schema(FieldSchema::new().field("name", FieldRule::readable(true).writable(true)))
            .guard(RouteGuardConfig::new(ActionRules::all(true)))
            .filters(BaseFilterConfig::new(ActionFilters::all(json!({"active": true}))))
            .build()
            .unwrap();

        let err = router
            .prepare_update_query(
                &ctx,
                QueryRequest::new(Action::Update).id("u2"),
                &json!({"_id": "u2", "active": false}),
                json!({"name": "renamed"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound));

        let plan = router
            .prepare_update_query(
                &ctx,
                QueryRequest::new(Action::Update).id("u2"),
                &json!({"_id": "u2", "active": true}),
                json!({"name": "renamed"}),
            )
            .await
            .unwrap();
        assert_eq!(plan.payload, json!({"name": "renamed"}));
        assert_eq!(
            plan.filter,
            Some(json!({"$and": [{"active": true}, {"_id": "u2"}]}))
        );
    }

    #[tokio::test]
    async fn test_select_is_narrowed_to_schema() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let plan = users()
            .plan_query(
                &ctx,
                QueryRequest::new(Action::List).select(["name", "password", "role.kind"]),
            )
            .await
            .unwrap();
        assert_eq!(plan.select, Some(vec!["name".to_string(), "role.kind".to_string()]));
    }

    #[tokio::test]
    async fn test_distinct_on_hidden_field_matches_nothing() {
        let engine = test_engine();
        let router = users();

        let ctx = engine.request(guest());
        let plan = router
            .plan_query(&ctx, QueryRequest::new(Action::Distinct).field("role"))
            .await
            .unwrap();
        assert!(plan.is_empty());

        let ctx = engine.request(admin());
        let plan = router
            .plan_query(&ctx, QueryRequest::new(Action::Distinct).field("role"))
            .await
            .unwrap();
        assert!(!plan.is_empty());
    }

    #[tokio::test]
    async fn test_create_is_not_a_query() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let err = users()
            .plan_query(&ctx, QueryRequest::new(Action::Create))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Config(_)));
    }

    #[tokio::test]
    async fn test_mask_document_none_is_not_found() {
        let engine = test_engine();
        let ctx = engine.request(guest());
        let err = users()
            .mask_document(&ctx, Action::Read, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound));
    }

    #[test]
    fn test_sub_collection_needs_sub_schema() {
        let result = ModelRouter::builder("posts")
            .schema(FieldSchema::new().field("comments", FieldRule::readable(true)))
            .sub_collection("comments")
            .build();
        assert!(matches!(result, Err(AccessError::Config(_))));
    }
}
