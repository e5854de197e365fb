//! Field permission schema walker
//!
//! Walks a [`FieldSchema`] in parallel with a document and computes the
//! [`FieldMask`] for one action. The walk is depth-first over an explicit
//! stack, so configuration depth never grows the call stack.
//!
//! Rules of the walk:
//! - fields are visited in name order, independent of declaration order;
//! - fields absent from the document are skipped without evaluating rules;
//! - a denied container prunes its whole subtree, whatever its children say;
//! - every sub-document (array element or nested object) is its own
//!   document for document-permission purposes;
//! - document permissions are resolved only for frames where a predicate
//!   rule is evaluated.

use std::sync::Arc;

use docguard_api::Action;
use serde_json::Value;
use tracing::trace;

use super::mask::{FieldMask, FieldPath, MaskEntry};
use super::FieldSchema;
use crate::context::RequestContext;
use crate::error::{AccessResult, EvaluationError};
use crate::permissions::{DocumentPermissions, GlobalPermissions};
use crate::rule::RuleContext;

/// Computed field mask
#[derive(Debug, Clone)]
pub struct MaskOutcome {
    pub mask: FieldMask,
}

impl MaskOutcome {
    pub fn apply(&self, document: &Value) -> Value {
        self.mask.apply(document)
    }
}

struct Frame<'a> {
    schema: &'a FieldSchema,
    scope: String,
    path: FieldPath,
    /// Value whose fields are masked
    shape: &'a Value,
    /// Value the rules and document permissions see
    source: &'a Value,
}

/// Computes field masks within one request
pub struct SchemaWalker<'a> {
    request: &'a RequestContext,
    global: &'a GlobalPermissions,
}

impl<'a> SchemaWalker<'a> {
    pub fn new(request: &'a RequestContext, global: &'a GlobalPermissions) -> Self {
        Self { request, global }
    }

    /// Compute the mask of `shape` for `action`.
    ///
    /// `source` is the document the rules are evaluated against; it is the
    /// stored document for updates and defaults to `shape` otherwise.
    /// `scope` names the schema for document-permission caching.
    pub async fn compute_mask(
        &self,
        schema: &FieldSchema,
        scope: &str,
        shape: &Value,
        source: Option<&Value>,
        action: Action,
    ) -> AccessResult<MaskOutcome> {
        let mut mask = FieldMask::new();
        if !shape.is_object() {
            return Ok(MaskOutcome { mask });
        }

        let mut stack = vec![Frame {
            schema,
            scope: scope.to_string(),
            path: FieldPath::root(),
            shape,
            source: source.filter(|s| s.is_object()).unwrap_or(shape),
        }];

        while let Some(frame) = stack.pop() {
            // Resolved on the first predicate rule of the frame
            let mut permissions: Option<Arc<DocumentPermissions>> = None;
            let mut children = Vec::new();

            for (name, field) in frame.schema.fields() {
                let Some(value) = frame.shape.get(name) else {
                    continue;
                };
                let path = frame.path.child(name);
                let rule = field.rule(action);

                let allowed = match rule.evaluate_static(self.global) {
                    Some(allowed) => allowed,
                    None => {
                        let resolved = match &permissions {
                            Some(resolved) => Arc::clone(resolved),
                            None => {
                                let resolved = self
                                    .request
                                    .document_permissions(&frame.scope, frame.schema.resolver(), frame.source, self.global)
                                    .await?;
                                permissions = Some(Arc::clone(&resolved));
                                resolved
                            }
                        };
                        let ctx = RuleContext::new(self.global, self.request).with_document(frame.source, &resolved);
                        rule.evaluate(&ctx).await.map_err(|e| {
                            EvaluationError::new(format!("field '{}' ({})", path, action), e)
                        })?
                    }
                };
                if !allowed {
                    trace!(request_id = %self.request.id(), field = %path, %action, "Field denied");
                    continue;
                }

                let Some(sub) = &field.sub else {
                    mask.insert(path, MaskEntry::Keep);
                    continue;
                };
                let scope = format!("{}.{}", frame.scope, name);
                let source_value = frame.source.get(name);

                match value {
                    Value::Array(items) => {
                        mask.insert(path.clone(), MaskEntry::Descend);
                        for (i, item) in items.iter().enumerate() {
                            let element = path.index(i);
                            if !item.is_object() {
                                mask.insert(element, MaskEntry::Keep);
                                continue;
                            }
                            mask.insert(element.clone(), MaskEntry::Descend);
                            children.push(Frame {
                                schema: sub,
                                scope: scope.clone(),
                                path: element,
                                shape: item,
                                source: matching_element(source_value, item).unwrap_or(item),
                            });
                        }
                    }
                    Value::Object(_) => {
                        mask.insert(path.clone(), MaskEntry::Descend);
                        children.push(Frame {
                            schema: sub,
                            scope,
                            path,
                            shape: value,
                            source: source_value.filter(|s| s.is_object()).unwrap_or(value),
                        });
                    }
                    _ => mask.insert(path, MaskEntry::Keep),
                }
            }

            // Reversed so children pop in name/index order
            stack.extend(children.into_iter().rev());
        }

        Ok(MaskOutcome { mask })
    }
}

/// Stored counterpart of a sub-document, matched by `_id`
fn matching_element<'v>(source: Option<&'v Value>, item: &Value) -> Option<&'v Value> {
    let id = item.get("_id")?;
    source?
        .as_array()?
        .iter()
        .find(|candidate| candidate.get("_id") == Some(id))
}
