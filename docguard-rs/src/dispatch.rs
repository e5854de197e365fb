//! One-call boundary adapter
//!
//! The routing layer calls [`dispatch`] once per logical action:
//!
//! - without `documents`, the action is planned before storage: the response
//!   carries the filter (and, for writes, the masked payload) to execute;
//! - with `documents`, they are the storage result and come back masked.
//!
//! Sub-collection actions take the already-fetched parent document in
//! `existing`.

use docguard_api::{Action, ActionRequest, ActionResponse};
use docguard_engine::{
    AccessError, AccessResult, Engine, ModelRouter, QueryRequest, RequestContext,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::response::IntoResponse;

/// Run one action through `router`
#[instrument(
    level = "debug",
    skip(router, ctx, request),
    fields(collection = %router.name(), action = ?request.action, request_id = %ctx.id())
)]
pub async fn dispatch(router: &ModelRouter, ctx: &RequestContext, request: ActionRequest) -> ActionResponse {
    let response = match request.sub_collection.clone() {
        Some(sub) => dispatch_sub(router, ctx, &sub, request).await,
        None => dispatch_collection(router, ctx, request).await,
    };
    if !response.allowed {
        debug!(status = response.status, "Action rejected");
    }
    response
}

/// Look up the router for `collection` and run one action through it
pub async fn dispatch_to(
    engine: &Engine,
    collection: &str,
    ctx: &RequestContext,
    request: ActionRequest,
) -> ActionResponse {
    match engine.router(collection).await {
        Ok(router) => dispatch(&router, ctx, request).await,
        Err(e) => e.into_response(&ctx.settings().status),
    }
}

async fn dispatch_collection(
    router: &ModelRouter,
    ctx: &RequestContext,
    mut request: ActionRequest,
) -> ActionResponse {
    let policy = &ctx.settings().status;
    let action = match required_action(&request) {
        Ok(action) => action,
        Err(e) => return e.into_response(policy),
    };

    match action {
        Action::Create => router
            .prepare_create(ctx, request.payload.unwrap_or_else(|| json!({})))
            .await
            .into_response(policy),
        Action::Update if request.payload.is_some() => {
            let (Some(payload), Some(existing)) = (request.payload.take(), request.existing.take())
            else {
                return missing("update payload requires the stored document in 'existing'")
                    .into_response(policy);
            };
            router
                .prepare_update_query(ctx, query(action, request), &existing, payload)
                .await
                .into_response(policy)
        }
        _ => match request.documents.take() {
            Some(documents) => mask_results(router, ctx, action, request, documents)
                .await
                .into_response(policy),
            None => router
                .plan_query(ctx, query(action, request))
                .await
                .into_response(policy),
        },
    }
}

/// Re-plan to run the guard and learn the effective action, then mask
async fn mask_results(
    router: &ModelRouter,
    ctx: &RequestContext,
    action: Action,
    request: ActionRequest,
    documents: Vec<Value>,
) -> AccessResult<Vec<Value>> {
    if !matches!(
        action,
        Action::List | Action::Read | Action::Count | Action::Distinct
    ) {
        return Err(AccessError::Config(format!(
            "action '{}' produces no documents to mask",
            action
        )));
    }

    let plan = router.plan_query(ctx, query(action, request)).await?;
    if plan.is_empty() {
        return if action == Action::Read {
            Err(AccessError::NotFound)
        } else {
            Ok(Vec::new())
        };
    }
    if action == Action::Read && documents.is_empty() {
        return Err(AccessError::NotFound);
    }
    router
        .mask_documents(ctx, plan.effective_action, documents)
        .await
}

async fn dispatch_sub(
    router: &ModelRouter,
    ctx: &RequestContext,
    sub: &str,
    request: ActionRequest,
) -> ActionResponse {
    let policy = &ctx.settings().status;
    let action = match required_action(&request) {
        Ok(action) => action,
        Err(e) => return e.into_response(policy),
    };

    if action == Action::Create {
        return router
            .prepare_sub_create(ctx, sub, request.payload.unwrap_or_else(|| json!({})))
            .await
            .into_response(policy);
    }

    let Some(parent) = request.existing.as_ref() else {
        return missing("sub-collection actions require the parent document in 'existing'")
            .into_response(policy);
    };
    let id = request.id.as_deref();

    match (action, id) {
        (Action::List, _) => router
            .list_sub(ctx, sub, parent, request.filter.clone())
            .await
            .into_response(policy),
        (Action::Read, Some(id)) => router.read_sub(ctx, sub, parent, id).await.into_response(policy),
        (Action::Update, Some(id)) => router
            .prepare_sub_update(
                ctx,
                sub,
                parent,
                id,
                request.payload.clone().unwrap_or_else(|| json!({})),
            )
            .await
            .into_response(policy),
        (Action::Delete, Some(id)) => router
            .check_sub_delete(ctx, sub, parent, id)
            .await
            .into_response(policy),
        (Action::Read | Action::Update | Action::Delete, None) => {
            missing("sub-collection element actions require an 'id'").into_response(policy)
        }
        (other, _) => AccessError::Config(format!(
            "action '{}' is not supported on sub-collections",
            other
        ))
        .into_response(policy),
    }
}

fn required_action(request: &ActionRequest) -> AccessResult<Action> {
    request
        .action
        .ok_or_else(|| missing("request has no action"))
}

fn missing(message: &str) -> AccessError {
    AccessError::Config(message.to_string())
}

fn query(action: Action, request: ActionRequest) -> QueryRequest {
    QueryRequest {
        action,
        filter: request.filter,
        id: request.id,
        limit: request.limit,
        select: request.select,
        field: request.field,
    }
}
