//! Sub-collection operations
//!
//! Elements of a sub-collection live in an array field of a parent
//! document the caller has already fetched. Sub guards and sub base filters
//! come from the `subs` entries of the router's configs; base filter
//! clauses are evaluated in memory against the elements.
//!
//! Reads also require the container field to be visible on the parent, so
//! an element is never readable through the sub route when its container
//! is hidden on the parent route. Writes are governed by the sub guard and
//! the element field rules only.

use std::sync::Arc;

use docguard_api::Action;
use serde_json::{json, Value};
use tracing::debug;

use super::{ModelRouter, WritePlan};
use crate::audit;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult, EvaluationError};
use crate::filter::QueryFilter;
use crate::permissions::GlobalPermissions;
use crate::rule::RuleContext;
use crate::schema::{FieldRule, FieldSchema, SchemaWalker};

/// Resolved sub-collection declaration
struct SubTarget<'r> {
    name: &'r str,
    field: &'r str,
    rule: &'r FieldRule,
    schema: &'r FieldSchema,
    scope: String,
}

impl ModelRouter {
    fn sub_target<'r>(&'r self, sub_collection: &'r str) -> AccessResult<SubTarget<'r>> {
        let unknown = || AccessError::UnknownSubCollection {
            collection: self.name.clone(),
            sub_collection: sub_collection.to_string(),
        };
        let field = self.sub_collections.get(sub_collection).ok_or_else(unknown)?;
        let rule = self.schema.get(field).ok_or_else(unknown)?;
        let schema = rule.sub.as_ref().ok_or_else(unknown)?;

        Ok(SubTarget {
            name: sub_collection,
            field,
            rule,
            schema,
            scope: format!("{}.{}", self.name, field),
        })
    }

    /// Guard and base filter for a sub-collection action
    async fn plan_sub(
        &self,
        ctx: &RequestContext,
        target: &SubTarget<'_>,
        action: Action,
        caller_filter: Option<Value>,
    ) -> AccessResult<(Arc<GlobalPermissions>, QueryFilter)> {
        let global = self.authorize_inner(ctx, action, Some(target.name)).await?;
        let base = self
            .filters
            .build(action, Some(target.name), &global, ctx)
            .await?;
        if base.is_deny() {
            debug!(collection = %self.name, sub_collection = target.name, %action, "Sub base filter denies every element");
            ctx.audit(audit::filter_denied(&self.name, action, Some(target.name)));
        }
        Ok((global, QueryFilter::merge(base, caller_filter)))
    }

    /// Whether the container field is visible on the parent for `action`
    async fn container_visible(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        target: &SubTarget<'_>,
        parent: &Value,
        action: Action,
    ) -> AccessResult<bool> {
        let rule = target.rule.rule(action);
        if let Some(visible) = rule.evaluate_static(global) {
            return Ok(visible);
        }
        let permissions = ctx
            .document_permissions(&self.name, self.schema.resolver(), parent, global)
            .await?;
        let rule_ctx = RuleContext::new(global, ctx).with_document(parent, &permissions);
        rule.evaluate(&rule_ctx).await.map_err(|e| {
            EvaluationError::new(format!("field '{}' ({})", target.field, action), e).into()
        })
    }

    fn elements<'p>(&self, target: &SubTarget<'_>, parent: &'p Value) -> &'p [Value] {
        parent
            .get(target.field)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    async fn mask_element(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        target: &SubTarget<'_>,
        element: &Value,
        action: Action,
    ) -> AccessResult<Value> {
        let outcome = SchemaWalker::new(ctx, global)
            .compute_mask(target.schema, &target.scope, element, None, action)
            .await?;
        let mut output = outcome.apply(element);
        if let Some(key) = &ctx.settings().permissions_field {
            let permissions = ctx
                .document_permissions(&target.scope, target.schema.resolver(), element, global)
                .await?;
            if let Some(map) = output.as_object_mut() {
                map.insert(key.clone(), permissions.to_value());
            }
        }
        Ok(output)
    }

    /// List the visible elements of a sub-collection inside `parent`
    pub async fn list_sub(
        &self,
        ctx: &RequestContext,
        sub_collection: &str,
        parent: &Value,
        filter: Option<Value>,
    ) -> AccessResult<Vec<Value>> {
        let result: AccessResult<Vec<Value>> = async {
            let target = self.sub_target(sub_collection)?;
            let (global, query) = self.plan_sub(ctx, &target, Action::List, filter).await?;
            if query.is_match_none()
                || !self
                    .container_visible(ctx, &global, &target, parent, Action::List)
                    .await?
            {
                return Ok(Vec::new());
            }

            let mut masked = Vec::new();
            for element in self.elements(&target, parent) {
                if query.matches(element) {
                    masked.push(
                        self.mask_element(ctx, &global, &target, element, Action::List)
                            .await?,
                    );
                }
            }
            Ok(masked)
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::List, e))
    }

    /// Read one element of a sub-collection by `_id`
    pub async fn read_sub(
        &self,
        ctx: &RequestContext,
        sub_collection: &str,
        parent: &Value,
        id: &str,
    ) -> AccessResult<Value> {
        let result: AccessResult<Value> = async {
            let target = self.sub_target(sub_collection)?;
            let (global, query) = self.plan_sub(ctx, &target, Action::Read, None).await?;
            if !self
                .container_visible(ctx, &global, &target, parent, Action::Read)
                .await?
            {
                return Err(AccessError::NotFound);
            }

            let query = query.and(json!({ "_id": id }));
            let element = self
                .elements(&target, parent)
                .iter()
                .find(|e| query.matches(e))
                .ok_or(AccessError::NotFound)?;
            self.mask_element(ctx, &global, &target, element, Action::Read)
                .await
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::Read, e))
    }

    /// Mask a new element for insertion into a sub-collection
    pub async fn prepare_sub_create(
        &self,
        ctx: &RequestContext,
        sub_collection: &str,
        payload: Value,
    ) -> AccessResult<WritePlan> {
        let result: AccessResult<WritePlan> = async {
            let target = self.sub_target(sub_collection)?;
            let global = self.authorize_inner(ctx, Action::Create, Some(target.name)).await?;
            self.prepare_element_write(ctx, &global, &target, Action::Create, payload, None)
                .await
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::Create, e))
    }

    /// Mask an update to the element `id` of a sub-collection
    pub async fn prepare_sub_update(
        &self,
        ctx: &RequestContext,
        sub_collection: &str,
        parent: &Value,
        id: &str,
        payload: Value,
    ) -> AccessResult<WritePlan> {
        let result: AccessResult<WritePlan> = async {
            let target = self.sub_target(sub_collection)?;
            let (global, query) = self.plan_sub(ctx, &target, Action::Update, None).await?;
            let query = query.and(json!({ "_id": id }));
            let existing = self
                .elements(&target, parent)
                .iter()
                .find(|e| query.matches(e))
                .ok_or(AccessError::NotFound)?;
            self.prepare_element_write(ctx, &global, &target, Action::Update, payload, Some(existing))
                .await
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::Update, e))
    }

    /// Check that the element `id` may be removed from a sub-collection
    pub async fn check_sub_delete(
        &self,
        ctx: &RequestContext,
        sub_collection: &str,
        parent: &Value,
        id: &str,
    ) -> AccessResult<()> {
        let result: AccessResult<()> = async {
            let target = self.sub_target(sub_collection)?;
            let (_, query) = self.plan_sub(ctx, &target, Action::Delete, None).await?;
            let query = query.and(json!({ "_id": id }));
            if self.elements(&target, parent).iter().any(|e| query.matches(e)) {
                Ok(())
            } else {
                Err(AccessError::NotFound)
            }
        }
        .await;
        result.map_err(|e| self.observe(ctx, Action::Delete, e))
    }

    async fn prepare_element_write(
        &self,
        ctx: &RequestContext,
        global: &GlobalPermissions,
        target: &SubTarget<'_>,
        action: Action,
        payload: Value,
        existing: Option<&Value>,
    ) -> AccessResult<WritePlan> {
        let outcome = SchemaWalker::new(ctx, global)
            .compute_mask(target.schema, &target.scope, &payload, existing, action)
            .await?;
        let masked = outcome.apply(&payload);
        let dropped = self.report_dropped(ctx, action, &outcome.mask.dropped_paths(&payload));
        Ok(WritePlan {
            payload: masked,
            dropped,
            filter: None,
        })
    }
}
