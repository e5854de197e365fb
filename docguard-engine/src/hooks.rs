//! Lifecycle hooks
//!
//! - `prepare` transforms a masked write payload before validation
//! - `validate` decides whether a write may proceed
//! - `decorate` transforms each masked output document
//! - `decorate_all` transforms the whole masked output list
//!
//! Hooks see the same request context as rules. A hook that fails is an
//! evaluation error, never a silent pass.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use docguard_api::Action;
use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::permissions::{DocumentPermissions, GlobalPermissions};
use crate::rule::json_kind;

/// Message used when validation fails without messages of its own
pub const GENERIC_VALIDATION_MESSAGE: &str = "Invalid payload";

/// What a hook may look at
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub request: &'a RequestContext,
    pub global: &'a GlobalPermissions,
    pub action: Action,
    /// Document permissions of the document being written or output
    pub document_permissions: Option<&'a DocumentPermissions>,
    /// Stored document, for updates
    pub existing: Option<&'a Value>,
}

impl HookContext<'_> {
    pub fn has(&self, tag: &str) -> bool {
        self.global.has(tag)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.document_permissions
            .map(|p| p.get(name))
            .unwrap_or(false)
    }
}

// ============================================================================
// Validation outcomes
// ============================================================================

/// Result of a validation hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// Failed without messages
    Invalid,
    /// Failed with messages; an empty list is valid
    Errors(Vec<String>),
}

impl ValidationOutcome {
    /// Messages to report, in order; empty when valid
    pub fn into_errors(self) -> Vec<String> {
        match self {
            ValidationOutcome::Valid => Vec::new(),
            ValidationOutcome::Invalid => vec![GENERIC_VALIDATION_MESSAGE.to_string()],
            ValidationOutcome::Errors(errors) => errors,
        }
    }
}

impl From<bool> for ValidationOutcome {
    fn from(valid: bool) -> Self {
        if valid {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::Invalid
        }
    }
}

impl From<Vec<String>> for ValidationOutcome {
    fn from(errors: Vec<String>) -> Self {
        ValidationOutcome::Errors(errors)
    }
}

impl From<Vec<&str>> for ValidationOutcome {
    fn from(errors: Vec<&str>) -> Self {
        ValidationOutcome::Errors(errors.into_iter().map(String::from).collect())
    }
}

impl<T: Into<ValidationOutcome>> From<Option<T>> for ValidationOutcome {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ValidationOutcome::Valid)
    }
}

impl From<Value> for ValidationOutcome {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ValidationOutcome::Valid,
            Value::Bool(valid) => valid.into(),
            Value::String(message) => ValidationOutcome::Errors(vec![message]),
            Value::Array(items) => ValidationOutcome::Errors(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            other => {
                warn!(returned = json_kind(&other), "Validation hook returned an unsupported value");
                ValidationOutcome::Invalid
            }
        }
    }
}

// ============================================================================
// Hook traits
// ============================================================================

#[async_trait]
pub trait PrepareHook: Send + Sync {
    async fn prepare(&self, payload: Value, ctx: &HookContext<'_>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait ValidateHook: Send + Sync {
    async fn validate(&self, payload: &Value, ctx: &HookContext<'_>) -> anyhow::Result<ValidationOutcome>;
}

#[async_trait]
pub trait DecorateHook: Send + Sync {
    async fn decorate(&self, document: Value, ctx: &HookContext<'_>) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait DecorateAllHook: Send + Sync {
    async fn decorate_all(&self, documents: Vec<Value>, ctx: &HookContext<'_>) -> anyhow::Result<Vec<Value>>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> PrepareHook for FnHook<F>
where
    F: Fn(Value, &HookContext<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn prepare(&self, payload: Value, ctx: &HookContext<'_>) -> anyhow::Result<Value> {
        (self.0)(payload, ctx)
    }
}

struct FnValidate<F, O>(F, PhantomData<fn() -> O>);

#[async_trait]
impl<F, O> ValidateHook for FnValidate<F, O>
where
    F: Fn(&Value, &HookContext<'_>) -> O + Send + Sync,
    O: Into<ValidationOutcome>,
{
    async fn validate(&self, payload: &Value, ctx: &HookContext<'_>) -> anyhow::Result<ValidationOutcome> {
        Ok((self.0)(payload, ctx).into())
    }
}

struct FnDecorate<F>(F);

#[async_trait]
impl<F> DecorateHook for FnDecorate<F>
where
    F: Fn(Value, &HookContext<'_>) -> Value + Send + Sync,
{
    async fn decorate(&self, document: Value, ctx: &HookContext<'_>) -> anyhow::Result<Value> {
        Ok((self.0)(document, ctx))
    }
}

struct FnDecorateAll<F>(F);

#[async_trait]
impl<F> DecorateAllHook for FnDecorateAll<F>
where
    F: Fn(Vec<Value>, &HookContext<'_>) -> Vec<Value> + Send + Sync,
{
    async fn decorate_all(&self, documents: Vec<Value>, ctx: &HookContext<'_>) -> anyhow::Result<Vec<Value>> {
        Ok((self.0)(documents, ctx))
    }
}

/// Validation entry: a constant outcome or a hook
#[derive(Clone)]
pub enum Validator {
    Constant(ValidationOutcome),
    Hook(Arc<dyn ValidateHook>),
}

impl Validator {
    /// Messages for `payload`; empty when it may be written
    pub async fn run(&self, payload: &Value, ctx: &HookContext<'_>) -> anyhow::Result<Vec<String>> {
        match self {
            Validator::Constant(outcome) => Ok(outcome.clone().into_errors()),
            Validator::Hook(hook) => Ok(hook.validate(payload, ctx).await?.into_errors()),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Constant(outcome) => f.debug_tuple("Constant").field(outcome).finish(),
            Validator::Hook(_) => f.write_str("Hook(..)"),
        }
    }
}

// ============================================================================
// Hook set
// ============================================================================

/// Hooks of one router
#[derive(Clone, Default)]
pub struct Hooks {
    pub prepare: Option<Arc<dyn PrepareHook>>,
    pub validate: Option<Validator>,
    pub decorate: Option<Arc<dyn DecorateHook>>,
    pub decorate_all: Option<Arc<dyn DecorateAllHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &HookContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(FnHook(f)));
        self
    }

    pub fn prepare_hook(mut self, hook: impl PrepareHook + 'static) -> Self {
        self.prepare = Some(Arc::new(hook));
        self
    }

    pub fn validate<F, O>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &HookContext<'_>) -> O + Send + Sync + 'static,
        O: Into<ValidationOutcome> + 'static,
    {
        self.validate = Some(Validator::Hook(Arc::new(FnValidate(f, PhantomData))));
        self
    }

    pub fn validate_hook(mut self, hook: impl ValidateHook + 'static) -> Self {
        self.validate = Some(Validator::Hook(Arc::new(hook)));
        self
    }

    /// Constant validation result (e.g. `false` to freeze a collection)
    pub fn validate_constant(mut self, outcome: impl Into<ValidationOutcome>) -> Self {
        self.validate = Some(Validator::Constant(outcome.into()));
        self
    }

    pub fn decorate<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &HookContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.decorate = Some(Arc::new(FnDecorate(f)));
        self
    }

    pub fn decorate_hook(mut self, hook: impl DecorateHook + 'static) -> Self {
        self.decorate = Some(Arc::new(hook));
        self
    }

    pub fn decorate_all<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Value>, &HookContext<'_>) -> Vec<Value> + Send + Sync + 'static,
    {
        self.decorate_all = Some(Arc::new(FnDecorateAll(f)));
        self
    }

    pub fn decorate_all_hook(mut self, hook: impl DecorateAllHook + 'static) -> Self {
        self.decorate_all = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("prepare", &self.prepare.is_some())
            .field("validate", &self.validate)
            .field("decorate", &self.decorate.is_some())
            .field("decorate_all", &self.decorate_all.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_engine;
    use serde_json::json;

    #[test]
    fn test_validation_shapes() {
        assert_eq!(ValidationOutcome::from(true).into_errors(), Vec::<String>::new());
        assert_eq!(ValidationOutcome::from(json!(null)).into_errors(), Vec::<String>::new());
        assert_eq!(ValidationOutcome::from(json!([])).into_errors(), Vec::<String>::new());
        assert_eq!(
            ValidationOutcome::from(false).into_errors(),
            vec![GENERIC_VALIDATION_MESSAGE]
        );
        assert_eq!(
            ValidationOutcome::from(vec!["error1", "error2"]).into_errors(),
            vec!["error1", "error2"]
        );
        assert_eq!(
            ValidationOutcome::from(None::<Vec<String>>),
            ValidationOutcome::Valid
        );
        assert_eq!(
            ValidationOutcome::from(json!({"bad": true})),
            ValidationOutcome::Invalid
        );
    }

    #[tokio::test]
    async fn test_validator_runs_hook() {
        let engine = test_engine();
        let request = engine.request(Default::default());
        let global = GlobalPermissions::none();
        let ctx = HookContext {
            request: &request,
            global: &global,
            action: Action::Create,
            document_permissions: None,
            existing: None,
        };

        let hooks = Hooks::new().validate(|payload: &Value, _: &HookContext<'_>| {
            if payload.get("name").is_some() {
                vec![]
            } else {
                vec!["name is required".to_string()]
            }
        });
        let validator = hooks.validate.unwrap();

        assert!(validator.run(&json!({"name": "a"}), &ctx).await.unwrap().is_empty());
        assert_eq!(
            validator.run(&json!({}), &ctx).await.unwrap(),
            vec!["name is required"]
        );

        let frozen = Validator::Constant(false.into());
        assert_eq!(frozen.run(&json!({}), &ctx).await.unwrap().len(), 1);
    }
}
