//! Error types for access-control evaluation

use docguard_api::{Action, ErrorBody, ErrorKind};
use thiserror::Error;

use crate::config::StatusPolicy;

/// Result type used throughout the engine
pub type AccessResult<T> = Result<T, AccessError>;

/// Failure inside a user-supplied rule, resolver, filter provider, or hook.
///
/// Kept distinct from a deliberate deny: a broken predicate is never
/// reported as "not allowed".
#[derive(Debug, Error)]
#[error("evaluation failed at {location}: {source}")]
pub struct EvaluationError {
    /// Where the failure happened (e.g. `field 'role' (list)`)
    pub location: String,
    #[source]
    pub source: anyhow::Error,
}

impl EvaluationError {
    pub fn new(location: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            location: location.into(),
            source,
        }
    }
}

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Failed to resolve caller identity: {0}")]
    IdentityResolution(#[source] anyhow::Error),

    #[error("Action '{action}' denied on '{collection}'{}", sub_suffix(.sub_collection))]
    GuardDenied {
        collection: String,
        action: Action,
        sub_collection: Option<String>,
    },

    #[error("Validation failed: {}", .errors.join(", "))]
    ValidationFailed { errors: Vec<String> },

    #[error("Document not found")]
    NotFound,

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unknown sub-collection '{sub_collection}' on '{collection}'")]
    UnknownSubCollection {
        collection: String,
        sub_collection: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn sub_suffix(sub: &Option<String>) -> String {
    sub.as_ref()
        .map(|s| format!(" (sub-collection '{}')", s))
        .unwrap_or_default()
}

impl AccessError {
    /// Boundary category for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::IdentityResolution(_) => ErrorKind::IdentityResolution,
            AccessError::GuardDenied { .. } => ErrorKind::GuardDenied,
            AccessError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            AccessError::NotFound
            | AccessError::UnknownCollection(_)
            | AccessError::UnknownSubCollection { .. } => ErrorKind::NotFound,
            AccessError::Evaluation(_) => ErrorKind::Evaluation,
            AccessError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this is an authorization failure (as opposed to a missing document)
    pub fn is_denied(&self) -> bool {
        matches!(self, AccessError::GuardDenied { .. })
    }

    /// Build the boundary error body under a status policy.
    ///
    /// A denied read is reported as not-found when the policy hides
    /// denied reads.
    pub fn to_error_body(&self, policy: &StatusPolicy) -> ErrorBody {
        match self {
            AccessError::GuardDenied {
                action: Action::Read,
                ..
            } if policy.hide_denied_reads => ErrorBody::new(ErrorKind::NotFound, "Document not found"),
            AccessError::GuardDenied { .. } => {
                ErrorBody::new(ErrorKind::GuardDenied, self.to_string()).with_status(policy.guard_denied)
            }
            AccessError::ValidationFailed { errors } => {
                ErrorBody::new(ErrorKind::ValidationFailed, "Validation failed").with_errors(errors.clone())
            }
            // Server-side failures do not leak their cause to the caller
            AccessError::IdentityResolution(_) => {
                ErrorBody::new(ErrorKind::IdentityResolution, "Failed to resolve caller identity")
            }
            AccessError::Evaluation(_) => ErrorBody::new(ErrorKind::Evaluation, "Access evaluation failed"),
            other => ErrorBody::new(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_denied_status_follows_policy() {
        let err = AccessError::GuardDenied {
            collection: "users".into(),
            action: Action::Create,
            sub_collection: None,
        };
        let policy = StatusPolicy {
            guard_denied: 401,
            hide_denied_reads: false,
        };

        let body = err.to_error_body(&policy);
        assert_eq!(body.kind, ErrorKind::GuardDenied);
        assert_eq!(body.status, 401);
        assert!(err.is_denied());
    }

    #[test]
    fn test_hidden_read_denial_looks_like_not_found() {
        let err = AccessError::GuardDenied {
            collection: "users".into(),
            action: Action::Read,
            sub_collection: None,
        };
        let policy = StatusPolicy {
            guard_denied: 403,
            hide_denied_reads: true,
        };

        let body = err.to_error_body(&policy);
        assert_eq!(body.kind, ErrorKind::NotFound);
        assert_eq!(body.status, 404);
    }

    #[test]
    fn test_validation_errors_keep_order() {
        let err = AccessError::ValidationFailed {
            errors: vec!["error1".into(), "error2".into()],
        };
        let body = err.to_error_body(&StatusPolicy::default());
        assert_eq!(body.status, 400);
        assert_eq!(body.errors, vec!["error1", "error2"]);
    }

    #[test]
    fn test_evaluation_error_is_not_a_denial() {
        let err: AccessError =
            EvaluationError::new("field 'role' (list)", anyhow::anyhow!("boom")).into();
        assert!(!err.is_denied());
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert!(err.to_string().contains("field 'role'"));
    }

    #[test]
    fn test_sub_collection_in_denial_message() {
        let err = AccessError::GuardDenied {
            collection: "posts".into(),
            action: Action::Delete,
            sub_collection: Some("comments".into()),
        };
        assert_eq!(
            err.to_string(),
            "Action 'delete' denied on 'posts' (sub-collection 'comments')"
        );
    }
}
