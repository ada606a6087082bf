#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use k8s_openapi::api::{
    core::v1::{ConfigMap, Namespace, Pod},
    rbac::v1::{
        ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
    },
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
pub use kube::{
    api::{Api, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error,
};

/// The api-group that RBAC `User` and `Group` subjects belong to.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub mod role_ref {
    /// `RoleRef` kinds a binding may carry.
    pub const ROLE: &str = "Role";
    pub const CLUSTER_ROLE: &str = "ClusterRole";
}
