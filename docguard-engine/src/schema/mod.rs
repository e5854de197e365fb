//! Field permission schemas
//!
//! A [`FieldSchema`] maps field names to [`FieldRule`]s. A rule carries one
//! [`Rule`] per field action (list, read, update, create) and optionally a
//! nested schema for array or object fields holding sub-documents. The
//! nesting is unbounded; the walker traverses it without recursion.
//!
//! ```rust
//! use docguard_engine::{FieldRule, FieldSchema};
//!
//! let schema = FieldSchema::new()
//!     .field("name", FieldRule::new().list(true).read(true))
//!     .field("role", FieldRule::new().list("isAdmin"))
//!     .field(
//!         "comments",
//!         FieldRule::readable(true).sub(
//!             FieldSchema::new().field("text", FieldRule::readable(true)),
//!         ),
//!     );
//! assert_eq!(schema.names().collect::<Vec<_>>(), vec!["comments", "name", "role"]);
//! ```

pub mod mask;
pub mod walker;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use docguard_api::Action;

use crate::permissions::DocumentPermissionsResolver;
use crate::rule::Rule;

pub use mask::{apply_mask, FieldMask, FieldPath, MaskEntry, PathSegment};
pub use walker::{MaskOutcome, SchemaWalker};

static DENY: Rule = Rule::Deny;

/// Per-action rules for one field, plus its optional sub-schema
#[derive(Debug, Clone, Default)]
pub struct FieldRule {
    pub list: Rule,
    pub read: Rule,
    pub update: Rule,
    pub create: Rule,
    pub sub: Option<FieldSchema>,
}

impl FieldRule {
    /// A field every action denies
    pub fn new() -> Self {
        Self::default()
    }

    /// Same rule for list and read
    pub fn readable(rule: impl Into<Rule>) -> Self {
        let rule = rule.into();
        Self {
            list: rule.clone(),
            read: rule,
            ..Self::default()
        }
    }

    /// Same rule for every action
    pub fn all(rule: impl Into<Rule>) -> Self {
        let rule = rule.into();
        Self {
            list: rule.clone(),
            read: rule.clone(),
            update: rule.clone(),
            create: rule,
            sub: None,
        }
    }

    pub fn list(mut self, rule: impl Into<Rule>) -> Self {
        self.list = rule.into();
        self
    }

    pub fn read(mut self, rule: impl Into<Rule>) -> Self {
        self.read = rule.into();
        self
    }

    pub fn update(mut self, rule: impl Into<Rule>) -> Self {
        self.update = rule.into();
        self
    }

    pub fn create(mut self, rule: impl Into<Rule>) -> Self {
        self.create = rule.into();
        self
    }

    /// Same rule for update and create
    pub fn writable(mut self, rule: impl Into<Rule>) -> Self {
        let rule = rule.into();
        self.update = rule.clone();
        self.create = rule;
        self
    }

    pub fn sub(mut self, schema: FieldSchema) -> Self {
        self.sub = Some(schema);
        self
    }

    /// Rule for a field action. Delete has no field rules and always denies.
    pub fn rule(&self, action: Action) -> &Rule {
        match action {
            Action::List | Action::Count | Action::Distinct => &self.list,
            Action::Read => &self.read,
            Action::Update => &self.update,
            Action::Create => &self.create,
            Action::Delete => &DENY,
        }
    }
}

/// Field rules of a document shape, ordered by field name
#[derive(Clone, Default)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldRule>,
    document_permissions: Option<Arc<dyn DocumentPermissionsResolver>>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    /// Resolver for the document permissions of documents of this shape.
    ///
    /// Without one, documents evaluate with empty document permissions.
    pub fn document_permissions(mut self, resolver: Arc<dyn DocumentPermissionsResolver>) -> Self {
        self.document_permissions = Some(resolver);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn resolver(&self) -> Option<&Arc<dyn DocumentPermissionsResolver>> {
        self.document_permissions.as_ref()
    }
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("fields", &self.fields)
            .field("document_permissions", &self.document_permissions.is_some())
            .finish()
    }
}
