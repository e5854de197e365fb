//! End-to-end tests of the guard / filter / mask pipeline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docguard_engine::audit::AuditEventType;
use docguard_engine::{
    document_resolver_fn, global_resolver_fn, AccessError, Action, ActionFilters, ActionRules,
    BaseFilter, BaseFilterConfig, DocumentPermissions, Engine, EngineConfig, EngineSettings,
    FieldRule, FieldSchema, FilterOutcome, HookContext, Hooks, MemoryAuditSink, ModelRouter,
    QueryFilter, QueryRequest, RequestMeta, RouteGuardConfig, Rule, RuleContext,
};
use serde_json::{json, Value};

fn engine_with(settings: EngineSettings) -> (Engine, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let config = EngineConfig::builder()
        .shared_audit(audit.clone())
        .settings(settings)
        .build()
        .expect("valid config");
    (Engine::new(config), audit)
}

fn caller(id: &str, admin: bool) -> RequestMeta {
    RequestMeta::new().user(json!({"_id": id, "permissions": {"isAdmin": admin}}))
}

fn users_router() -> ModelRouter {
    ModelRouter::builder("users")
        .schema(
            FieldSchema::new()
                .field("_id", FieldRule::readable(true))
                .field("name", FieldRule::readable(true).update(true).create(true))
                .field("role", FieldRule::new().list("isAdmin").read("isAdmin").create("isAdmin")),
        )
        .guard(RouteGuardConfig::new(
            ActionRules::new().list(true).read(true).update(true).create("isAdmin"),
        ))
        .filters(BaseFilterConfig::new(
            ActionFilters::new()
                .list(true)
                .update(true)
                .read(BaseFilter::provider(|ctx| {
                    if ctx.has("isAdmin") {
                        FilterOutcome::Unrestricted
                    } else {
                        json!({"_id": ctx.user_id()}).into()
                    }
                })),
        ))
        .build()
        .expect("valid router")
}

#[tokio::test]
async fn test_list_hides_role_from_non_admin() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let docs = vec![json!({"_id": "a", "name": "Ann", "role": "admin"})];

    let ctx = engine.request(caller("u1", false));
    let plan = users.plan_query(&ctx, QueryRequest::new(Action::List)).await.unwrap();
    let masked = users.mask_documents(&ctx, plan.effective_action, docs.clone()).await.unwrap();
    assert_eq!(masked, vec![json!({"_id": "a", "name": "Ann"})]);

    let ctx = engine.request(caller("root", true));
    let masked = users.mask_documents(&ctx, Action::List, docs.clone()).await.unwrap();
    assert_eq!(masked, docs);
}

#[tokio::test]
async fn test_masking_is_idempotent_and_contained() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));
    let doc = json!({"_id": "a", "name": "Ann", "role": "admin", "secret": 1});

    let once = users.mask_document(&ctx, Action::Read, Some(doc.clone())).await.unwrap();
    let twice = users.mask_document(&ctx, Action::Read, Some(once.clone())).await.unwrap();
    assert_eq!(once, twice);

    let original = doc.as_object().unwrap();
    for (key, value) in once.as_object().unwrap() {
        assert_eq!(original.get(key), Some(value));
    }
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let err = users.mask_document(&ctx, Action::Read, None).await.unwrap_err();
    assert!(matches!(err, AccessError::NotFound));
}

#[tokio::test]
async fn test_read_filter_scopes_non_admin_to_self() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let stored = [json!({"_id": "u1", "name": "me"}), json!({"_id": "u2", "name": "other"})];

    let ctx = engine.request(caller("u1", false));
    let plan = users
        .plan_query(&ctx, QueryRequest::new(Action::Read).id("u2"))
        .await
        .unwrap();
    assert!(stored.iter().all(|doc| !plan.filter.matches(doc)));

    let plan = users
        .plan_query(&ctx, QueryRequest::new(Action::Read).id("u1"))
        .await
        .unwrap();
    let found: Vec<&Value> = stored.iter().filter(|doc| plan.filter.matches(doc)).collect();
    assert_eq!(found, vec![&stored[0]]);

    let admin = engine.request(caller("root", true));
    let plan = users
        .plan_query(&admin, QueryRequest::new(Action::Read).id("u2"))
        .await
        .unwrap();
    assert_eq!(plan.filter.clause(), Some(&json!({"_id": "u2"})));
}

#[tokio::test]
async fn test_false_base_filter_skips_storage() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("notes")
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .filters(BaseFilterConfig::new(ActionFilters::all(true).delete(false)))
        .build()
        .unwrap();
    let notes = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let plan = notes
        .plan_query(&ctx, QueryRequest::new(Action::Delete).filter(json!({"_id": "n1"})))
        .await
        .unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.filter, QueryFilter::MatchNone);
    assert_eq!(audit.find_by_type(AuditEventType::FilterDenied).len(), 1);
}

#[tokio::test]
async fn test_missing_filter_entry_denies() {
    let (engine, _) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("notes")
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .filters(BaseFilterConfig::new(ActionFilters::new().list(true)))
        .build()
        .unwrap();
    let notes = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let plan = notes.plan_query(&ctx, QueryRequest::new(Action::Update)).await.unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn test_caller_filter_is_intersected() {
    let (engine, _) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("posts")
        .guard(RouteGuardConfig::new(ActionRules::new().list(true)))
        .filters(BaseFilterConfig::new(
            ActionFilters::new().list(json!({"published": true})),
        ))
        .build()
        .unwrap();
    let posts = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let plan = posts
        .plan_query(&ctx, QueryRequest::new(Action::List).filter(json!({"author": "u2"})))
        .await
        .unwrap();
    assert_eq!(
        plan.filter.clause(),
        Some(&json!({"$and": [{"published": true}, {"author": "u2"}]}))
    );
    assert!(plan.filter.matches(&json!({"published": true, "author": "u2"})));
    assert!(!plan.filter.matches(&json!({"published": false, "author": "u2"})));
}

#[tokio::test]
async fn test_guard_denial_short_circuits() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let filter_calls = Arc::new(AtomicUsize::new(0));
    let rule_calls = Arc::new(AtomicUsize::new(0));

    let filters = Arc::clone(&filter_calls);
    let rules = Arc::clone(&rule_calls);
    let router = ModelRouter::builder("secrets")
        .schema(FieldSchema::new().field(
            "value",
            FieldRule::readable(Rule::predicate(move |_: &RuleContext<'_>| {
                rules.fetch_add(1, Ordering::SeqCst);
                true
            })),
        ))
        .guard(RouteGuardConfig::new(ActionRules::new().list("isAdmin")))
        .filters(BaseFilterConfig::new(ActionFilters::new().list(BaseFilter::provider(
            move |_| {
                filters.fetch_add(1, Ordering::SeqCst);
                true
            },
        ))))
        .build()
        .unwrap();
    let secrets = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let err = secrets.plan_query(&ctx, QueryRequest::new(Action::List)).await.unwrap_err();
    assert!(err.is_denied());
    assert_eq!(filter_calls.load(Ordering::SeqCst), 0);
    assert_eq!(rule_calls.load(Ordering::SeqCst), 0);

    let events = audit.find_by_type(AuditEventType::GuardDenied);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].collection.as_deref(), Some("secrets"));
}

#[tokio::test]
async fn test_create_denied_without_tag() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let err = users
        .prepare_create(&ctx, json!({"name": "new"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::GuardDenied { action: Action::Create, .. }
    ));
    assert_eq!(audit.find_by_type(AuditEventType::GuardDenied).len(), 1);
}

#[tokio::test]
async fn test_write_drops_unwritable_fields() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;

    let admin = engine.request(caller("root", true));
    let plan = users
        .prepare_create(&admin, json!({"name": "new", "role": "user", "extra": 1}))
        .await
        .unwrap();
    assert_eq!(plan.payload, json!({"name": "new", "role": "user"}));
    assert_eq!(plan.dropped, vec!["extra"]);

    let ctx = engine.request(caller("u1", false));
    let stored = json!({"_id": "u1", "name": "me", "role": "user"});
    let plan = users
        .prepare_update(&ctx, &stored, json!({"name": "renamed", "role": "admin"}))
        .await
        .unwrap();
    assert_eq!(plan.payload, json!({"name": "renamed"}));
    assert_eq!(plan.dropped, vec!["role"]);
    assert_eq!(audit.find_by_type(AuditEventType::FieldsDropped).len(), 2);
}

#[tokio::test]
async fn test_validation_errors_are_reported_in_order() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("items")
        .schema(FieldSchema::new().field("name", FieldRule::all(true)))
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .hooks(Hooks::new().validate(|_: &Value, _: &HookContext<'_>| {
            vec!["error1", "error2"]
        }))
        .build()
        .unwrap();
    let items = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let err = items.prepare_create(&ctx, json!({"name": "x"})).await.unwrap_err();
    match err {
        AccessError::ValidationFailed { errors } => assert_eq!(errors, vec!["error1", "error2"]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(audit.find_by_type(AuditEventType::ValidationFailed).len(), 1);
}

#[tokio::test]
async fn test_prepare_hook_runs_before_validation() {
    let (engine, _) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("items")
        .schema(FieldSchema::new().field("name", FieldRule::all(true)))
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .hooks(
            Hooks::new()
                .prepare(|mut payload, _| {
                    payload["slug"] = json!("generated");
                    Ok(payload)
                })
                .validate(|payload: &Value, _: &HookContext<'_>| {
                    payload.get("slug").is_some()
                }),
        )
        .build()
        .unwrap();
    let items = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let plan = items.prepare_create(&ctx, json!({"name": "x"})).await.unwrap();
    assert_eq!(plan.payload, json!({"name": "x", "slug": "generated"}));
}

#[tokio::test]
async fn test_identity_failure_is_not_a_denial() {
    let audit = Arc::new(MemoryAuditSink::new());
    let config = EngineConfig::builder()
        .shared_audit(audit.clone())
        .shared_global_resolver(global_resolver_fn(|_| anyhow::bail!("session store offline")))
        .build()
        .unwrap();
    let engine = Engine::new(config);
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let err = users.plan_query(&ctx, QueryRequest::new(Action::List)).await.unwrap_err();
    assert!(matches!(err, AccessError::IdentityResolution(_)));
    assert!(!err.is_denied());
    assert_eq!(
        audit.find_by_type(AuditEventType::IdentityResolutionFailed).len(),
        1
    );
}

#[tokio::test]
async fn test_predicate_error_is_an_evaluation_failure() {
    let (engine, audit) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("items")
        .guard(RouteGuardConfig::new(ActionRules::new().list(Rule::try_predicate(
            |_: &RuleContext<'_>| -> anyhow::Result<bool> { anyhow::bail!("lookup failed") },
        ))))
        .build()
        .unwrap();
    let items = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let err = items.plan_query(&ctx, QueryRequest::new(Action::List)).await.unwrap_err();
    match &err {
        AccessError::Evaluation(e) => assert!(e.location.contains("list")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(audit.find_by_type(AuditEventType::GuardDenied).is_empty());
    assert_eq!(audit.find_by_type(AuditEventType::EvaluationFailed).len(), 1);
}

#[tokio::test]
async fn test_request_caches_are_released_on_drop() {
    let (engine, _) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("users")
        .schema(FieldSchema::new().field("name", FieldRule::readable(Rule::predicate(
            |ctx: &RuleContext<'_>| ctx.flag("isSelf"),
        ))))
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .document_permissions(document_resolver_fn(|doc, _, request| {
            let is_self = doc.get("_id").and_then(Value::as_str).map(String::from) == request.user_id();
            DocumentPermissions::new().with("isSelf", is_self)
        }))
        .build()
        .unwrap();
    let users = engine.register(router).await;

    {
        let ctx = engine.request(caller("u1", false));
        let masked = users
            .mask_documents(
                &ctx,
                Action::List,
                vec![json!({"_id": "u1", "name": "me"}), json!({"_id": "u2", "name": "other"})],
            )
            .await
            .unwrap();
        assert_eq!(masked, vec![json!({"name": "me"}), json!({})]);
        assert_eq!(engine.cache_sizes(), (1, 2));
    }
    assert_eq!(engine.cache_sizes(), (0, 0));
}

#[tokio::test]
async fn test_request_release_keeps_other_requests_cached() {
    let (engine, _) = engine_with(EngineSettings::default());
    let router = ModelRouter::builder("users")
        .schema(FieldSchema::new().field("name", FieldRule::readable(Rule::predicate(
            |ctx: &RuleContext<'_>| ctx.flag("isSelf"),
        ))))
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .document_permissions(document_resolver_fn(|doc, _, request| {
            let is_self = doc.get("_id").and_then(Value::as_str).map(String::from) == request.user_id();
            DocumentPermissions::new().with("isSelf", is_self)
        }))
        .build()
        .unwrap();
    let users = engine.register(router).await;

    let first = engine.request(caller("u1", false));
    let second = engine.request(caller("u2", false));
    for ctx in [&first, &second] {
        users
            .mask_document(ctx, Action::Read, Some(json!({"_id": "u1", "name": "me"})))
            .await
            .unwrap();
    }
    assert_eq!(engine.cache_sizes(), (2, 2));

    drop(first);
    assert_eq!(engine.cache_sizes(), (1, 1));

    let masked = users
        .mask_document(&second, Action::Read, Some(json!({"_id": "u2", "name": "me"})))
        .await
        .unwrap();
    assert_eq!(masked, json!({"name": "me"}));
    assert_eq!(engine.cache_sizes(), (1, 2));
}

#[tokio::test]
async fn test_read_falls_back_to_list() {
    let settings = EngineSettings {
        read_falls_back_to_list: true,
        list_hard_limit: Some(50),
        ..Default::default()
    };
    let (engine, _) = engine_with(settings);
    let router = ModelRouter::builder("posts")
        .schema(
            FieldSchema::new()
                .field("title", FieldRule::readable(true))
                .field("body", FieldRule::new().read(true)),
        )
        .guard(RouteGuardConfig::new(ActionRules::new().list(true)))
        .filters(BaseFilterConfig::new(ActionFilters::new().list(true)))
        .build()
        .unwrap();
    let posts = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let plan = posts
        .plan_query(&ctx, QueryRequest::new(Action::Read).id("p1").limit(500))
        .await
        .unwrap();
    assert_eq!(plan.action, Action::Read);
    assert_eq!(plan.effective_action, Action::List);
    assert_eq!(plan.limit, Some(50));

    let doc = posts
        .mask_document(&ctx, plan.effective_action, Some(json!({"title": "t", "body": "b"})))
        .await
        .unwrap();
    assert_eq!(doc, json!({"title": "t"}));
}

#[tokio::test]
async fn test_permissions_field_is_attached() {
    let settings = EngineSettings {
        permissions_field: Some("_permissions".to_string()),
        ..Default::default()
    };
    let (engine, _) = engine_with(settings);
    let router = ModelRouter::builder("docs")
        .schema(FieldSchema::new().field("title", FieldRule::readable(true)))
        .guard(RouteGuardConfig::new(ActionRules::all(true)))
        .document_permissions(document_resolver_fn(|_, _, _| {
            DocumentPermissions::new().with("canEdit", true)
        }))
        .build()
        .unwrap();
    let docs = engine.register(router).await;
    let ctx = engine.request(caller("u1", false));

    let doc = docs
        .mask_document(&ctx, Action::Read, Some(json!({"title": "t"})))
        .await
        .unwrap();
    assert_eq!(doc, json!({"title": "t", "_permissions": {"canEdit": true}}));
}

#[tokio::test]
async fn test_parallel_masking_preserves_order() {
    let settings = EngineSettings {
        parallel_masking: true,
        ..Default::default()
    };
    let (engine, _) = engine_with(settings);
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let docs: Vec<Value> = (0..20)
        .map(|i| json!({"_id": format!("u{}", i), "name": i, "role": "user"}))
        .collect();
    let masked = users.mask_documents(&ctx, Action::List, docs).await.unwrap();

    let names: Vec<i64> = masked.iter().map(|d| d["name"].as_i64().unwrap()).collect();
    assert_eq!(names, (0..20).collect::<Vec<_>>());
    assert!(masked.iter().all(|d| d.get("role").is_none()));
}

#[tokio::test]
async fn test_distinct_on_hidden_field_matches_nothing() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let plan = users
        .plan_query(&ctx, QueryRequest::new(Action::Distinct).field("role"))
        .await
        .unwrap();
    assert!(plan.is_empty());

    let plan = users
        .plan_query(&ctx, QueryRequest::new(Action::Distinct).field("name"))
        .await
        .unwrap();
    assert!(!plan.is_empty());
}

#[tokio::test]
async fn test_select_keeps_schema_fields_only() {
    let (engine, _) = engine_with(EngineSettings::default());
    let users = engine.register(users_router()).await;
    let ctx = engine.request(caller("u1", false));

    let plan = users
        .plan_query(&ctx, QueryRequest::new(Action::List).select(["name", "password", "role.label"]))
        .await
        .unwrap();
    assert_eq!(plan.select, Some(vec!["name".to_string(), "role.label".to_string()]));
}
