#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod access;
mod user;

pub use self::access::{Access, AccessList, AccessListByVerb, AccessSet, GroupResource, ALL};
pub use self::user::{service_account_user_name, UserInfo, AUTHENTICATED_GROUP};

/// Resolves a user identity to its compiled access set.
///
/// Implemented by the RBAC index; consumed by the schema projection cache so
/// that it does not need to know how access sets are produced.
pub trait AccessSetLookup: Send + Sync {
    fn access_for(&self, user: &UserInfo) -> AccessSet;
}
