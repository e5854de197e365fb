//! Conversion of engine results into boundary responses

use docguard_api::ActionResponse;
use docguard_engine::{AccessError, AccessResult, QueryPlan, StatusPolicy, WritePlan};
use serde_json::Value;

/// Trait for converting engine results into an [`ActionResponse`].
///
/// Errors are rendered under a [`StatusPolicy`], so the same failure can be
/// reported as 401 or 403, and a denied read as 404, depending on policy.
pub trait IntoResponse {
    fn into_response(self, policy: &StatusPolicy) -> ActionResponse;
}

/// Allowed with nothing attached (e.g. a permitted sub-collection delete)
impl IntoResponse for () {
    fn into_response(self, _policy: &StatusPolicy) -> ActionResponse {
        ActionResponse::allowed()
    }
}

impl IntoResponse for QueryPlan {
    fn into_response(self, _policy: &StatusPolicy) -> ActionResponse {
        ActionResponse {
            filter: self.filter.into_clause(),
            limit: self.limit,
            select: self.select,
            ..ActionResponse::allowed()
        }
    }
}

impl IntoResponse for WritePlan {
    fn into_response(self, _policy: &StatusPolicy) -> ActionResponse {
        ActionResponse {
            payload: Some(self.payload),
            filter: self.filter,
            ..ActionResponse::allowed()
        }
    }
}

/// Masked documents
impl IntoResponse for Vec<Value> {
    fn into_response(self, _policy: &StatusPolicy) -> ActionResponse {
        ActionResponse {
            documents: Some(self),
            ..ActionResponse::allowed()
        }
    }
}

/// A single masked document
impl IntoResponse for Value {
    fn into_response(self, policy: &StatusPolicy) -> ActionResponse {
        vec![self].into_response(policy)
    }
}

impl IntoResponse for AccessError {
    fn into_response(self, policy: &StatusPolicy) -> ActionResponse {
        ActionResponse::rejected(self.to_error_body(policy))
    }
}

impl<T: IntoResponse> IntoResponse for AccessResult<T> {
    fn into_response(self, policy: &StatusPolicy) -> ActionResponse {
        match self {
            Ok(value) => value.into_response(policy),
            Err(e) => e.into_response(policy),
        }
    }
}
