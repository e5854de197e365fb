//! Caller-wide and document-scoped capability sets
//!
//! - [`GlobalPermissions`] are computed once per request from the caller's
//!   identity by a [`GlobalPermissionsResolver`].
//! - [`DocumentPermissions`] are computed per document (and per sub-document)
//!   by a [`DocumentPermissionsResolver`] from the global permissions and the
//!   document's own fields.

pub mod document;
pub mod global;

pub use document::{document_resolver_fn, DocumentPermissions, DocumentPermissionsResolver};
pub use global::{
    global_resolver_fn, GlobalPermissions, GlobalPermissionsResolver, StaticGlobalPermissions,
    UserRecordPermissions,
};
