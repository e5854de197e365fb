//! Base filters
//!
//! A base filter bounds which documents an action can reach at all,
//! independent of field visibility. Each action maps to a constant clause,
//! `true` (no restriction), `false` (nothing reachable), or a provider
//! computed from the caller's global permissions.
//!
//! The builder never touches storage. [`QueryFilter`] is what the router
//! hands back: either a clause to AND into the storage query, or
//! [`QueryFilter::MatchNone`] meaning the storage call must be skipped.

pub mod matcher;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use docguard_api::Action;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult, EvaluationError};
use crate::permissions::GlobalPermissions;
use crate::rule::json_kind;

pub use matcher::matches;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of evaluating one base filter entry
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// `true` or `{}`: no restriction
    Unrestricted,
    /// `false`: nothing is reachable
    Deny,
    /// A clause to intersect with the caller's filter
    Clause(Value),
}

impl FilterOutcome {
    pub fn is_deny(&self) -> bool {
        matches!(self, FilterOutcome::Deny)
    }
}

impl From<bool> for FilterOutcome {
    fn from(value: bool) -> Self {
        if value {
            FilterOutcome::Unrestricted
        } else {
            FilterOutcome::Deny
        }
    }
}

impl From<Value> for FilterOutcome {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => b.into(),
            Value::Object(map) if map.is_empty() => FilterOutcome::Unrestricted,
            Value::Object(map) => FilterOutcome::Clause(Value::Object(map)),
            other => {
                warn!(returned = json_kind(&other), "Base filter is not an object; denying");
                FilterOutcome::Deny
            }
        }
    }
}

impl From<Map<String, Value>> for FilterOutcome {
    fn from(map: Map<String, Value>) -> Self {
        Value::Object(map).into()
    }
}

// ============================================================================
// Providers
// ============================================================================

/// What a filter provider may look at
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub global: &'a GlobalPermissions,
    pub request: &'a RequestContext,
    /// The action whose filter is being built (after count/distinct mapping)
    pub action: Action,
    pub sub_collection: Option<&'a str>,
}

impl FilterContext<'_> {
    pub fn has(&self, tag: &str) -> bool {
        self.global.has(tag)
    }

    /// Id of the requesting user, if authenticated
    pub fn user_id(&self) -> Option<String> {
        self.request.user_id()
    }
}

/// Computes a base filter from request context
#[async_trait]
pub trait FilterProvider: Send + Sync {
    async fn build(&self, ctx: &FilterContext<'_>) -> anyhow::Result<FilterOutcome>;
}

struct FnFilterProvider<F, O>(F, PhantomData<fn() -> O>);

#[async_trait]
impl<F, O> FilterProvider for FnFilterProvider<F, O>
where
    F: Fn(&FilterContext<'_>) -> anyhow::Result<O> + Send + Sync,
    O: Into<FilterOutcome>,
{
    async fn build(&self, ctx: &FilterContext<'_>) -> anyhow::Result<FilterOutcome> {
        (self.0)(ctx).map(Into::into)
    }
}

/// One action's base filter
#[derive(Clone)]
pub enum BaseFilter {
    Unrestricted,
    Deny,
    Clause(Value),
    Provider(Arc<dyn FilterProvider>),
}

impl BaseFilter {
    /// Infallible synchronous provider
    pub fn provider<F, O>(f: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> O + Send + Sync + 'static,
        O: Into<FilterOutcome> + 'static,
    {
        BaseFilter::try_provider(move |ctx: &FilterContext<'_>| Ok::<O, anyhow::Error>(f(ctx)))
    }

    /// Fallible synchronous provider
    pub fn try_provider<F, O>(f: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<FilterOutcome> + 'static,
    {
        BaseFilter::Provider(Arc::new(FnFilterProvider(f, PhantomData)))
    }

    /// Asynchronous provider
    pub fn from_provider(provider: impl FilterProvider + 'static) -> Self {
        BaseFilter::Provider(Arc::new(provider))
    }

    async fn evaluate(&self, ctx: &FilterContext<'_>) -> anyhow::Result<FilterOutcome> {
        match self {
            BaseFilter::Unrestricted => Ok(FilterOutcome::Unrestricted),
            BaseFilter::Deny => Ok(FilterOutcome::Deny),
            BaseFilter::Clause(clause) => Ok(FilterOutcome::from(clause.clone())),
            BaseFilter::Provider(provider) => provider.build(ctx).await,
        }
    }
}

impl fmt::Debug for BaseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseFilter::Unrestricted => f.write_str("Unrestricted"),
            BaseFilter::Deny => f.write_str("Deny"),
            BaseFilter::Clause(clause) => f.debug_tuple("Clause").field(clause).finish(),
            BaseFilter::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

impl From<bool> for BaseFilter {
    fn from(value: bool) -> Self {
        if value {
            BaseFilter::Unrestricted
        } else {
            BaseFilter::Deny
        }
    }
}

impl From<Value> for BaseFilter {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => b.into(),
            clause => BaseFilter::Clause(clause),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// Base filters per action. An absent entry denies everything.
#[derive(Debug, Clone, Default)]
pub struct ActionFilters {
    pub list: Option<BaseFilter>,
    pub read: Option<BaseFilter>,
    pub update: Option<BaseFilter>,
    pub delete: Option<BaseFilter>,
}

impl ActionFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same filter for every action
    pub fn all(filter: impl Into<BaseFilter>) -> Self {
        let filter = filter.into();
        Self {
            list: Some(filter.clone()),
            read: Some(filter.clone()),
            update: Some(filter.clone()),
            delete: Some(filter),
        }
    }

    pub fn list(mut self, filter: impl Into<BaseFilter>) -> Self {
        self.list = Some(filter.into());
        self
    }

    pub fn read(mut self, filter: impl Into<BaseFilter>) -> Self {
        self.read = Some(filter.into());
        self
    }

    pub fn update(mut self, filter: impl Into<BaseFilter>) -> Self {
        self.update = Some(filter.into());
        self
    }

    pub fn delete(mut self, filter: impl Into<BaseFilter>) -> Self {
        self.delete = Some(filter.into());
        self
    }

    /// Entry for an action; `None` for create, which has no base filter
    fn entry(&self, action: Action) -> Option<&Option<BaseFilter>> {
        match action.guard_action() {
            Action::List => Some(&self.list),
            Action::Read => Some(&self.read),
            Action::Update => Some(&self.update),
            Action::Delete => Some(&self.delete),
            _ => None,
        }
    }
}

/// Base filters of a collection plus per-sub-collection overrides
#[derive(Debug, Clone, Default)]
pub struct BaseFilterConfig {
    pub filters: ActionFilters,
    pub subs: BTreeMap<String, ActionFilters>,
}

impl BaseFilterConfig {
    pub fn new(filters: ActionFilters) -> Self {
        Self {
            filters,
            subs: BTreeMap::new(),
        }
    }

    pub fn sub(mut self, name: impl Into<String>, filters: ActionFilters) -> Self {
        self.subs.insert(name.into(), filters);
        self
    }

    /// Build the base filter for `action`.
    ///
    /// Create is never bounded by a base filter. A missing entry, or an
    /// unknown sub-collection, yields [`FilterOutcome::Deny`].
    pub async fn build(
        &self,
        action: Action,
        sub_collection: Option<&str>,
        global: &GlobalPermissions,
        request: &RequestContext,
    ) -> AccessResult<FilterOutcome> {
        let filters = match sub_collection {
            None => &self.filters,
            Some(name) => match self.subs.get(name) {
                Some(filters) => filters,
                None => return Ok(FilterOutcome::Deny),
            },
        };

        let Some(entry) = filters.entry(action) else {
            return Ok(FilterOutcome::Unrestricted);
        };
        let Some(filter) = entry else {
            return Ok(FilterOutcome::Deny);
        };

        let ctx = FilterContext {
            global,
            request,
            action: action.guard_action(),
            sub_collection,
        };
        filter.evaluate(&ctx).await.map_err(|e| {
            let location = match sub_collection {
                Some(sub) => format!("base filter '{}' of sub-collection '{}'", ctx.action, sub),
                None => format!("base filter '{}'", ctx.action),
            };
            AccessError::from(EvaluationError::new(location, e))
        })
    }
}

// ============================================================================
// Query filters
// ============================================================================

/// Filter handed to the storage layer
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    /// Nothing is reachable; skip storage entirely
    MatchNone,
    /// Clause to execute (`{}` matches everything)
    Match(Value),
}

impl QueryFilter {
    /// Intersect a base filter outcome with the caller's filter.
    ///
    /// A denying base filter wins regardless of the caller's filter.
    pub fn merge(base: FilterOutcome, caller: Option<Value>) -> Self {
        let caller = caller.filter(|c| !is_empty_clause(c));
        match (base, caller) {
            (FilterOutcome::Deny, _) => QueryFilter::MatchNone,
            (FilterOutcome::Unrestricted, None) => QueryFilter::Match(json!({})),
            (FilterOutcome::Unrestricted, Some(caller)) => QueryFilter::Match(caller),
            (FilterOutcome::Clause(base), None) => QueryFilter::Match(base),
            (FilterOutcome::Clause(base), Some(caller)) => {
                QueryFilter::Match(json!({ "$and": [base, caller] }))
            }
        }
    }

    /// AND another clause into this filter
    pub fn and(self, clause: Value) -> Self {
        match self {
            QueryFilter::MatchNone => QueryFilter::MatchNone,
            QueryFilter::Match(current) if is_empty_clause(&current) => QueryFilter::Match(clause),
            QueryFilter::Match(current) => match current {
                Value::Object(mut map) if map.len() == 1 && matches!(map.get("$and"), Some(Value::Array(_))) => {
                    if let Some(Value::Array(items)) = map.get_mut("$and") {
                        items.push(clause);
                    }
                    QueryFilter::Match(Value::Object(map))
                }
                current => QueryFilter::Match(json!({ "$and": [current, clause] })),
            },
        }
    }

    pub fn is_match_none(&self) -> bool {
        matches!(self, QueryFilter::MatchNone)
    }

    /// The clause, or `None` when nothing is reachable
    pub fn clause(&self) -> Option<&Value> {
        match self {
            QueryFilter::MatchNone => None,
            QueryFilter::Match(clause) => Some(clause),
        }
    }

    pub fn into_clause(self) -> Option<Value> {
        match self {
            QueryFilter::MatchNone => None,
            QueryFilter::Match(clause) => Some(clause),
        }
    }

    /// Whether an in-memory document passes this filter
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            QueryFilter::MatchNone => false,
            QueryFilter::Match(clause) => matcher::matches(clause, document),
        }
    }
}

fn is_empty_clause(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty()) || value.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_merge_false_base_ignores_caller() {
        let merged = QueryFilter::merge(FilterOutcome::Deny, Some(json!({"status": "open"})));
        assert_eq!(merged, QueryFilter::MatchNone);
        assert!(!merged.matches(&json!({"status": "open"})));
    }

    #[test]
    fn test_merge_shapes() {
        assert_eq!(
            QueryFilter::merge(FilterOutcome::Unrestricted, None),
            QueryFilter::Match(json!({}))
        );
        assert_eq!(
            QueryFilter::merge(FilterOutcome::Unrestricted, Some(json!({"a": 1}))),
            QueryFilter::Match(json!({"a": 1}))
        );
        assert_eq!(
            QueryFilter::merge(FilterOutcome::Clause(json!({"owner": "u1"})), Some(json!({}))),
            QueryFilter::Match(json!({"owner": "u1"}))
        );
        assert_eq!(
            QueryFilter::merge(
                FilterOutcome::Clause(json!({"owner": "u1"})),
                Some(json!({"a": 1}))
            ),
            QueryFilter::Match(json!({"$and": [{"owner": "u1"}, {"a": 1}]}))
        );
    }

    #[test]
    fn test_and_flattens() {
        let filter = QueryFilter::Match(json!({"$and": [{"a": 1}, {"b": 2}]})).and(json!({"_id": "x"}));
        assert_eq!(
            filter,
            QueryFilter::Match(json!({"$and": [{"a": 1}, {"b": 2}, {"_id": "x"}]}))
        );

        let filter = QueryFilter::Match(json!({})).and(json!({"_id": "x"}));
        assert_eq!(filter, QueryFilter::Match(json!({"_id": "x"})));

        assert_eq!(QueryFilter::MatchNone.and(json!({"_id": "x"})), QueryFilter::MatchNone);
    }

    #[test]
    fn test_and_keeps_clause_when_and_is_not_a_list() {
        let filter = QueryFilter::Match(json!({"$and": {"x": 1}})).and(json!({"_id": "u2"}));
        assert_eq!(
            filter,
            QueryFilter::Match(json!({"$and": [{"$and": {"x": 1}}, {"_id": "u2"}]}))
        );
    }

    #[test]
    fn test_outcome_from_value() {
        assert_eq!(FilterOutcome::from(json!(true)), FilterOutcome::Unrestricted);
        assert_eq!(FilterOutcome::from(json!({})), FilterOutcome::Unrestricted);
        assert_eq!(FilterOutcome::from(json!(false)), FilterOutcome::Deny);
        assert_eq!(FilterOutcome::from(json!("owner")), FilterOutcome::Deny);
        assert_eq!(
            FilterOutcome::from(json!({"a": 1})),
            FilterOutcome::Clause(json!({"a": 1}))
        );
    }

    #[tokio::test]
    async fn test_absent_entry_denies_and_create_is_unbounded() {
        let engine = test_engine();
        let request = engine.request(Default::default());
        let global = GlobalPermissions::allow_all();
        let config = BaseFilterConfig::new(ActionFilters::new().list(true));

        let list = config.build(Action::List, None, &global, &request).await.unwrap();
        assert_eq!(list, FilterOutcome::Unrestricted);

        let read = config.build(Action::Read, None, &global, &request).await.unwrap();
        assert_eq!(read, FilterOutcome::Deny);

        let count = config.build(Action::Count, None, &global, &request).await.unwrap();
        assert_eq!(count, FilterOutcome::Unrestricted);

        let create = config.build(Action::Create, None, &global, &request).await.unwrap();
        assert_eq!(create, FilterOutcome::Unrestricted);
    }

    #[tokio::test]
    async fn test_sub_collection_lookup() {
        let engine = test_engine();
        let request = engine.request(Default::default());
        let global = GlobalPermissions::none();
        let config = BaseFilterConfig::new(ActionFilters::all(true))
            .sub("comments", ActionFilters::new().list(json!({"hidden": false})));

        let listed = config
            .build(Action::List, Some("comments"), &global, &request)
            .await
            .unwrap();
        assert_eq!(listed, FilterOutcome::Clause(json!({"hidden": false})));

        let unknown = config
            .build(Action::List, Some("likes"), &global, &request)
            .await
            .unwrap();
        assert_eq!(unknown, FilterOutcome::Deny);
    }

    #[tokio::test]
    async fn test_provider_sees_global_and_action() {
        let engine = test_engine();
        let request = engine.request(Default::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let config = BaseFilterConfig::new(ActionFilters::new().read(BaseFilter::provider(
            move |ctx: &FilterContext<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(ctx.action, Action::Read);
                if ctx.has("isAdmin") {
                    json!({})
                } else {
                    json!({"public": true})
                }
            },
        )));

        let admin = GlobalPermissions::flags([("isAdmin", true)]);
        let outcome = config.build(Action::Read, None, &admin, &request).await.unwrap();
        assert_eq!(outcome, FilterOutcome::Unrestricted);

        let guest = GlobalPermissions::none();
        let outcome = config.build(Action::Read, None, &guest, &request).await.unwrap();
        assert_eq!(outcome, FilterOutcome::Clause(json!({"public": true})));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_error_is_evaluation_error() {
        let engine = test_engine();
        let request = engine.request(Default::default());
        let config = BaseFilterConfig::new(ActionFilters::new().delete(BaseFilter::try_provider(
            |_: &FilterContext<'_>| -> anyhow::Result<Value> { anyhow::bail!("directory offline") },
        )));

        let err = config
            .build(Action::Delete, None, &GlobalPermissions::none(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Evaluation(_)));
        assert!(err.to_string().contains("base filter 'delete'"));
    }
}
