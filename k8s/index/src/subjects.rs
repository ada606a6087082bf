use vantage_core::service_account_user_name;
use vantage_k8s_api::{self as k8s, role_ref, RBAC_GROUP};

/// The two subject axes a binding is indexed under.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
        }
    }
}

/// Subject names of the given kind mentioned by a `RoleBinding`.
///
/// In `User` mode, service-account subjects are emitted under their synthetic
/// `system:serviceaccount:<ns>:<name>` user name. In `Group` mode they are
/// ignored, as are subjects with an unrecognized api-group/kind pair.
pub fn role_binding_subjects(kind: SubjectKind, rb: &k8s::RoleBinding) -> Vec<String> {
    index_subjects(kind, rb.subjects.as_deref().unwrap_or_default())
}

/// Subject names of the given kind mentioned by a `ClusterRoleBinding`.
///
/// Cluster role bindings whose role-ref is not a `ClusterRole` are never
/// indexed.
pub fn cluster_role_binding_subjects(
    kind: SubjectKind,
    crb: &k8s::ClusterRoleBinding,
) -> Vec<String> {
    if crb.role_ref.kind != role_ref::CLUSTER_ROLE {
        return Vec::new();
    }
    index_subjects(kind, crb.subjects.as_deref().unwrap_or_default())
}

fn index_subjects(kind: SubjectKind, subjects: &[k8s::Subject]) -> Vec<String> {
    subjects
        .iter()
        .filter_map(|subject| {
            if subject_is(kind, subject) {
                Some(subject.name.clone())
            } else if kind == SubjectKind::User && subject_is_service_account(subject) {
                Some(service_account_user_name(
                    subject.namespace.as_deref().unwrap_or_default(),
                    &subject.name,
                ))
            } else {
                None
            }
        })
        .collect()
}

fn subject_is(kind: SubjectKind, subject: &k8s::Subject) -> bool {
    subject.api_group.as_deref() == Some(RBAC_GROUP) && subject.kind == kind.as_str()
}

fn subject_is_service_account(subject: &k8s::Subject) -> bool {
    subject.api_group.as_deref().unwrap_or_default().is_empty()
        && subject.kind == "ServiceAccount"
        && !subject.namespace.as_deref().unwrap_or_default().is_empty()
}
