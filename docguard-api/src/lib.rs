//! docguard-api: Boundary types for the docguard access-control engine
//!
//! This crate defines what crosses the line between the request-handling
//! layer and the engine: the action being attempted, the request envelope,
//! the response envelope, and the error body. Nothing here evaluates rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Actions
// ============================================================================

/// Operation attempted against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Read,
    Create,
    Update,
    Delete,
    Count,
    Distinct,
}

impl Action {
    /// All actions, in declaration order.
    pub const ALL: [Action; 7] = [
        Action::List,
        Action::Read,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Count,
        Action::Distinct,
    ];

    /// The action whose route guard and base filter govern this one.
    ///
    /// `Count` and `Distinct` are list-shaped reads and share list rules.
    pub fn guard_action(self) -> Action {
        match self {
            Action::Count | Action::Distinct => Action::List,
            other => other,
        }
    }

    /// The field-level action used when masking documents for this action.
    ///
    /// `Delete` never masks fields.
    pub fn field_action(self) -> Option<Action> {
        match self {
            Action::List | Action::Count | Action::Distinct => Some(Action::List),
            Action::Read => Some(Action::Read),
            Action::Create => Some(Action::Create),
            Action::Update => Some(Action::Update),
            Action::Delete => None,
        }
    }

    /// Whether this action writes a payload.
    pub fn is_write(self) -> bool {
        matches!(self, Action::Create | Action::Update)
    }

    /// Snake-case name used in logs and audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Count => "count",
            Action::Distinct => "distinct",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown action '{}'", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

// ============================================================================
// Errors at the boundary
// ============================================================================

/// Category of a failed request, independent of the status it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller identity could not be resolved (server-side failure).
    IdentityResolution,
    /// The route guard denied the action.
    GuardDenied,
    /// The validation hook rejected the payload.
    ValidationFailed,
    /// No reachable document matched.
    NotFound,
    /// A user-supplied rule, resolver, or hook failed.
    Evaluation,
    /// Engine misconfiguration (unknown collection, bad settings).
    Config,
}

impl ErrorKind {
    /// Default status code for this kind.
    pub fn default_status(self) -> u16 {
        match self {
            ErrorKind::IdentityResolution => 500,
            ErrorKind::GuardDenied => 403,
            ErrorKind::ValidationFailed => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Evaluation => 500,
            ErrorKind::Config => 500,
        }
    }
}

/// Serializable error body returned to the boundary layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    /// Validation messages, in the order the hook produced them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ErrorBody {
    /// Create an error body using the kind's default status.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Override the status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Attach validation messages
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

// ============================================================================
// Request / response envelopes
// ============================================================================

/// One logical action as handed over by the routing layer.
///
/// When `documents` is absent the request is planned before storage is
/// touched; when present, the documents are the storage result to mask.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: Option<Action>,
    /// Sub-collection name (e.g. "comments") for nested operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_collection: Option<String>,
    /// External identifier for single-document actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Caller-supplied filter clause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    /// Write payload for create/update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Existing document (update) or parent document (sub-collection actions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<Value>,
    /// Storage results to mask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
    /// Field for distinct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
}

impl ActionRequest {
    /// Create a request for an action
    pub fn new(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    pub fn sub_collection(mut self, name: impl Into<String>) -> Self {
        self.sub_collection = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn existing(mut self, existing: Value) -> Self {
        self.existing = Some(existing);
        self
    }

    pub fn documents(mut self, documents: Vec<Value>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
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
}

/// Outcome handed back to the routing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub allowed: bool,
    pub status: u16,
    /// Storage filter to execute; `None` when nothing is reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ActionResponse {
    /// An allowed response with nothing attached yet
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            status: 200,
            filter: None,
            limit: None,
            select: None,
            documents: None,
            payload: None,
            error: None,
        }
    }

    /// A rejected response carrying an error body
    pub fn rejected(error: ErrorBody) -> Self {
        Self {
            allowed: false,
            status: error.status,
            filter: None,
            limit: None,
            select: None,
            documents: None,
            payload: None,
            error: Some(error),
        }
    }

    /// Validation or other messages attached to the error, if any
    pub fn errors(&self) -> &[String] {
        self.error.as_ref().map(|e| e.errors.as_slice()).unwrap_or(&[])
    }
}

// ============================================================================
// Document fingerprints
// ============================================================================

/// Content digest of a document.
///
/// Computed with blake3 over the MessagePack encoding of the value, so two
/// documents share a fingerprint only when their content is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a JSON document
    pub fn of(value: &Value) -> Self {
        let bytes = rmp_serde::to_vec(value).unwrap_or_else(|_| value.to_string().into_bytes());
        Self(*blake3::hash(&bytes).as_bytes())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for log output
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_round_trips_through_str() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("purge".parse::<Action>().is_err());
    }

    #[test]
    fn test_count_and_distinct_use_list_rules() {
        assert_eq!(Action::Count.guard_action(), Action::List);
        assert_eq!(Action::Distinct.guard_action(), Action::List);
        assert_eq!(Action::Distinct.field_action(), Some(Action::List));
        assert_eq!(Action::Delete.field_action(), None);
    }

    #[test]
    fn test_error_body_defaults() {
        let body = ErrorBody::new(ErrorKind::ValidationFailed, "invalid")
            .with_errors(vec!["error1".into(), "error2".into()]);
        assert_eq!(body.status, 400);
        assert_eq!(body.errors, vec!["error1", "error2"]);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "validation_failed");
    }

    #[test]
    fn test_request_deserializes_from_boundary_json() {
        let request: ActionRequest = serde_json::from_value(json!({
            "action": "read",
            "id": "abc",
            "filter": {"status": "open"}
        }))
        .unwrap();

        assert_eq!(request.action, Some(Action::Read));
        assert_eq!(request.id.as_deref(), Some("abc"));
        assert!(request.documents.is_none());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = json!({"name": "a", "role": "user"});
        let b = json!({"name": "a", "role": "user"});
        let c = json!({"name": "a", "role": "admin"});

        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&c));
        assert_eq!(Fingerprint::of(&a).to_string().len(), 64);
        assert_eq!(Fingerprint::of(&a).short().len(), 12);
    }
}
