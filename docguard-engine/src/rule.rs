//! Permission rules and their evaluation
//!
//! A [`Rule`] is one of `Allow`, `Deny`, a single capability tag, a list of
//! tags (any one suffices), or a predicate. The same shape is used for route
//! guards and for per-field rules.
//!
//! ```rust
//! use docguard_engine::Rule;
//!
//! let public: Rule = true.into();
//! let admins: Rule = "isAdmin".into();
//! let staff: Rule = vec!["isAdmin", "isEditor"].into();
//! let owner = Rule::predicate(|ctx| ctx.flag("edit.name"));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::permissions::{DocumentPermissions, GlobalPermissions};

/// Everything a rule may look at.
///
/// Guard evaluation has no document; field evaluation has both the
/// document and its document permissions.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub global: &'a GlobalPermissions,
    pub document_permissions: Option<&'a DocumentPermissions>,
    pub document: Option<&'a Value>,
    pub request: &'a RequestContext,
}

impl<'a> RuleContext<'a> {
    /// Context without a document (route guards, distinct checks)
    pub fn new(global: &'a GlobalPermissions, request: &'a RequestContext) -> Self {
        Self {
            global,
            document_permissions: None,
            document: None,
            request,
        }
    }

    /// Attach a document and its permissions
    pub fn with_document(
        mut self,
        document: &'a Value,
        document_permissions: &'a DocumentPermissions,
    ) -> Self {
        self.document = Some(document);
        self.document_permissions = Some(document_permissions);
        self
    }

    /// Global capability check
    pub fn has(&self, tag: &str) -> bool {
        self.global.has(tag)
    }

    /// Document flag; false when there is no document context
    pub fn flag(&self, name: &str) -> bool {
        self.document_permissions
            .map(|p| p.get(name))
            .unwrap_or(false)
    }

    /// Top-level field of the document under evaluation
    pub fn field(&self, name: &str) -> Option<&'a Value> {
        self.document.and_then(|d| d.get(name))
    }
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("global", self.global)
            .field("document_permissions", &self.document_permissions)
            .field("has_document", &self.document.is_some())
            .field("request", &self.request.id())
            .finish()
    }
}

/// What a predicate returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// A direct decision
    Decided(bool),
    /// Tag names, satisfied if any one is present
    AnyOf(Vec<String>),
    /// A value the rule contract does not cover; evaluates as deny
    Unsupported(String),
}

impl From<bool> for RuleOutcome {
    fn from(value: bool) -> Self {
        RuleOutcome::Decided(value)
    }
}

impl From<Vec<String>> for RuleOutcome {
    fn from(tags: Vec<String>) -> Self {
        RuleOutcome::AnyOf(tags)
    }
}

impl From<Vec<&str>> for RuleOutcome {
    fn from(tags: Vec<&str>) -> Self {
        RuleOutcome::AnyOf(tags.into_iter().map(String::from).collect())
    }
}

impl From<Value> for RuleOutcome {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => RuleOutcome::Decided(b),
            Value::Array(items) if items.iter().all(Value::is_string) => RuleOutcome::AnyOf(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            other => RuleOutcome::Unsupported(json_kind(&other).to_string()),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// User-supplied predicate rule, possibly asynchronous
#[async_trait]
pub trait RulePredicate: Send + Sync {
    async fn evaluate(&self, ctx: &RuleContext<'_>) -> anyhow::Result<RuleOutcome>;
}

struct FnPredicate<F, O> {
    f: F,
    _outcome: PhantomData<fn() -> O>,
}

#[async_trait]
impl<F, O> RulePredicate for FnPredicate<F, O>
where
    F: Fn(&RuleContext<'_>) -> anyhow::Result<O> + Send + Sync,
    O: Into<RuleOutcome>,
{
    async fn evaluate(&self, ctx: &RuleContext<'_>) -> anyhow::Result<RuleOutcome> {
        (self.f)(ctx).map(Into::into)
    }
}

/// A permission rule
#[derive(Clone, Default)]
pub enum Rule {
    Allow,
    /// Absence of a rule is always a deny
    #[default]
    Deny,
    Tag(String),
    AnyOf(Vec<String>),
    Predicate(Arc<dyn RulePredicate>),
}

impl Rule {
    /// Infallible synchronous predicate
    pub fn predicate<F, O>(f: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> O + Send + Sync + 'static,
        O: Into<RuleOutcome> + 'static,
    {
        Rule::try_predicate(move |ctx: &RuleContext<'_>| Ok::<O, anyhow::Error>(f(ctx)))
    }

    /// Fallible synchronous predicate; an error is reported as an
    /// evaluation failure, never as a deny
    pub fn try_predicate<F, O>(f: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<RuleOutcome> + 'static,
    {
        Rule::Predicate(Arc::new(FnPredicate {
            f,
            _outcome: PhantomData,
        }))
    }

    /// Asynchronous predicate
    pub fn from_predicate(predicate: impl RulePredicate + 'static) -> Self {
        Rule::Predicate(Arc::new(predicate))
    }

    /// Decide without running predicates; `None` for predicate rules
    pub fn evaluate_static(&self, global: &GlobalPermissions) -> Option<bool> {
        match self {
            Rule::Allow => Some(true),
            Rule::Deny => Some(false),
            Rule::Tag(tag) => Some(global.has(tag)),
            Rule::AnyOf(tags) => Some(any_of(global, tags)),
            Rule::Predicate(_) => None,
        }
    }

    /// Evaluate against a context.
    ///
    /// Only predicate rules suspend. A predicate's error is returned as-is so
    /// the caller can report it with its location.
    pub async fn evaluate(&self, ctx: &RuleContext<'_>) -> anyhow::Result<bool> {
        let predicate = match self {
            Rule::Predicate(p) => p,
            other => return Ok(other.evaluate_static(ctx.global).unwrap_or(false)),
        };

        Ok(match predicate.evaluate(ctx).await? {
            RuleOutcome::Decided(decision) => decision,
            RuleOutcome::AnyOf(tags) => any_of(ctx.global, &tags),
            RuleOutcome::Unsupported(kind) => {
                warn!(returned = %kind, "Rule predicate returned an unsupported value; denying");
                false
            }
        })
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, Rule::Predicate(_))
    }
}

fn any_of<S: AsRef<str>>(global: &GlobalPermissions, tags: &[S]) -> bool {
    tags.iter().any(|t| global.has(t.as_ref()))
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Allow => f.write_str("Allow"),
            Rule::Deny => f.write_str("Deny"),
            Rule::Tag(tag) => f.debug_tuple("Tag").field(tag).finish(),
            Rule::AnyOf(tags) => f.debug_tuple("AnyOf").field(tags).finish(),
            Rule::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<bool> for Rule {
    fn from(value: bool) -> Self {
        if value {
            Rule::Allow
        } else {
            Rule::Deny
        }
    }
}

impl From<&str> for Rule {
    fn from(tag: &str) -> Self {
        Rule::Tag(tag.to_string())
    }
}

impl From<String> for Rule {
    fn from(tag: String) -> Self {
        Rule::Tag(tag)
    }
}

impl From<Vec<&str>> for Rule {
    fn from(tags: Vec<&str>) -> Self {
        Rule::AnyOf(tags.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Rule {
    fn from(tags: Vec<String>) -> Self {
        Rule::AnyOf(tags)
    }
}

impl<const N: usize> From<[&str; N]> for Rule {
    fn from(tags: [&str; N]) -> Self {
        Rule::AnyOf(tags.iter().map(|t| t.to_string()).collect())
    }
}
