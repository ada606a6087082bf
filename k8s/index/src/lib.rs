//! RBAC access-compilation index.
//!
//! A single `Index` consumes watch events for the four RBAC resource types
//! and maintains reverse indexes from subject names to the bindings that
//! mention them:
//!
//! ```ignore
//! [Role] <- [RoleBinding] -> by_user / by_group -> subject name
//! [ClusterRole] <- [RoleBinding]
//!               <- [ClusterRoleBinding] -> by_user / by_group -> subject name
//! ```
//!
//! `access_for` walks the bindings indexed under a user name and its groups,
//! resolves each binding's role-ref, and expands every policy rule into a
//! canonical [`AccessSet`]. Unresolvable role-refs expand to nothing; RBAC is
//! an open world and a dangling reference is not an error.
//!
//! Every mutation bumps a revision published on a watch channel so that the
//! schema projection cache can drop projections computed against older RBAC
//! state.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_role;
mod cluster_role_binding;
mod metrics;
mod role;
mod role_binding;
mod rules;
mod subjects;
#[cfg(test)]
mod tests;

pub use self::metrics::IndexMetrics;
pub use self::rules::add_resource_access;
pub use self::subjects::{
    cluster_role_binding_subjects, role_binding_subjects, SubjectKind,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use vantage_core::{AccessSet, AccessSetLookup, UserInfo, ALL};
use vantage_k8s_api::{self as k8s, role_ref};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Namespace/name key for namespaced objects.
type ObjectKey = (String, String);

/// Holds all RBAC indexing state. Owned and updated by a single task that
/// processes watch events; queries take a shared view through the lock.
#[derive(Debug)]
pub struct Index {
    roles: HashMap<ObjectKey, Vec<k8s::PolicyRule>>,
    cluster_roles: HashMap<String, Vec<k8s::PolicyRule>>,

    role_bindings: HashMap<ObjectKey, RoleBindingEntry>,
    cluster_role_bindings: HashMap<String, ClusterRoleBindingEntry>,

    role_bindings_by_user: HashMap<String, HashSet<ObjectKey>>,
    role_bindings_by_group: HashMap<String, HashSet<ObjectKey>>,
    cluster_role_bindings_by_user: HashMap<String, HashSet<String>>,
    cluster_role_bindings_by_group: HashMap<String, HashSet<String>>,

    revision: u64,
    changed: watch::Sender<u64>,
}

/// The parts of a `RoleRef` a binding resolution needs.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RoleRefTarget {
    kind: String,
    name: String,
}

impl From<&k8s::RoleRef> for RoleRefTarget {
    fn from(rr: &k8s::RoleRef) -> Self {
        Self {
            kind: rr.kind.clone(),
            name: rr.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RoleBindingEntry {
    namespace: String,
    role_ref: RoleRefTarget,
    users: Vec<String>,
    groups: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ClusterRoleBindingEntry {
    role_ref: RoleRefTarget,
    users: Vec<String>,
    groups: Vec<String>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            roles: HashMap::default(),
            cluster_roles: HashMap::default(),
            role_bindings: HashMap::default(),
            cluster_role_bindings: HashMap::default(),
            role_bindings_by_user: HashMap::default(),
            role_bindings_by_group: HashMap::default(),
            cluster_role_bindings_by_user: HashMap::default(),
            cluster_role_bindings_by_group: HashMap::default(),
            revision: 0,
            changed,
        }
    }

    /// Subscribes to RBAC invalidation. The value is a revision counter that
    /// increases on every observed mutation.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Composes the complete access set for a user identity by walking the
    /// bindings indexed under the user name and each of its groups.
    pub fn access_for(&self, user: &UserInfo) -> AccessSet {
        let mut set = AccessSet::default();

        let mut binding_keys: BTreeSet<&ObjectKey> = BTreeSet::new();
        if let Some(keys) = self.role_bindings_by_user.get(&user.name) {
            binding_keys.extend(keys.iter());
        }
        for group in &user.groups {
            if let Some(keys) = self.role_bindings_by_group.get(group) {
                binding_keys.extend(keys.iter());
            }
        }
        for key in binding_keys {
            let binding = &self.role_bindings[key];
            self.expand(&mut set, &binding.role_ref, &binding.namespace);
        }

        let mut cluster_keys: BTreeSet<&String> = BTreeSet::new();
        if let Some(names) = self.cluster_role_bindings_by_user.get(&user.name) {
            cluster_keys.extend(names.iter());
        }
        for group in &user.groups {
            if let Some(names) = self.cluster_role_bindings_by_group.get(group) {
                cluster_keys.extend(names.iter());
            }
        }
        for name in cluster_keys {
            let binding = &self.cluster_role_bindings[name];
            self.expand(&mut set, &binding.role_ref, ALL);
        }

        set
    }

    fn expand(&self, set: &mut AccessSet, role_ref: &RoleRefTarget, namespace: &str) {
        let rules = match role_ref.kind.as_str() {
            role_ref::ROLE => self
                .roles
                .get(&(namespace.to_string(), role_ref.name.clone())),
            role_ref::CLUSTER_ROLE => self.cluster_roles.get(&role_ref.name),
            _ => None,
        };
        let rules = match rules {
            Some(rules) => rules,
            None => {
                tracing::debug!(kind = %role_ref.kind, name = %role_ref.name, "unresolvable role-ref");
                return;
            }
        };
        for rule in rules {
            rules::add_resource_access(set, namespace, rule);
        }
    }

    fn bump(&mut self) {
        self.revision += 1;
        self.changed.send_replace(self.revision);
    }

    // --- roles ---

    pub(crate) fn apply_role(&mut self, namespace: String, name: String, rules: Vec<k8s::PolicyRule>) {
        if self.roles.get(&(namespace.clone(), name.clone())) == Some(&rules) {
            tracing::debug!(%namespace, role = %name, "no changes");
            return;
        }
        self.roles.insert((namespace, name), rules);
        self.bump();
    }

    pub(crate) fn delete_role(&mut self, namespace: String, name: String) {
        if self.roles.remove(&(namespace, name)).is_some() {
            self.bump();
        }
    }

    pub(crate) fn apply_cluster_role(&mut self, name: String, rules: Vec<k8s::PolicyRule>) {
        if self.cluster_roles.get(&name) == Some(&rules) {
            tracing::debug!(cluster_role = %name, "no changes");
            return;
        }
        self.cluster_roles.insert(name, rules);
        self.bump();
    }

    pub(crate) fn delete_cluster_role(&mut self, name: String) {
        if self.cluster_roles.remove(&name).is_some() {
            self.bump();
        }
    }

    // --- role bindings ---

    pub(crate) fn apply_role_binding(&mut self, rb: k8s::RoleBinding) {
        let namespace = rb.namespace().unwrap_or_default();
        let name = rb.name_any();
        let entry = RoleBindingEntry {
            namespace: namespace.clone(),
            role_ref: RoleRefTarget::from(&rb.role_ref),
            users: subjects::role_binding_subjects(SubjectKind::User, &rb),
            groups: subjects::role_binding_subjects(SubjectKind::Group, &rb),
        };
        let key = (namespace, name);
        if let Some(old) = self.role_bindings.get(&key) {
            if *old == entry {
                return;
            }
            let old = old.clone();
            self.unindex_role_binding(&key, &old);
        }
        for user in &entry.users {
            self.role_bindings_by_user
                .entry(user.clone())
                .or_default()
                .insert(key.clone());
        }
        for group in &entry.groups {
            self.role_bindings_by_group
                .entry(group.clone())
                .or_default()
                .insert(key.clone());
        }
        self.role_bindings.insert(key, entry);
        self.bump();
    }

    pub(crate) fn delete_role_binding(&mut self, namespace: String, name: String) {
        let key = (namespace, name);
        if let Some(entry) = self.role_bindings.remove(&key) {
            self.unindex_role_binding(&key, &entry);
            self.bump();
        }
    }

    fn unindex_role_binding(&mut self, key: &ObjectKey, entry: &RoleBindingEntry) {
        for user in &entry.users {
            if let Some(keys) = self.role_bindings_by_user.get_mut(user) {
                keys.remove(key);
                if keys.is_empty() {
                    self.role_bindings_by_user.remove(user);
                }
            }
        }
        for group in &entry.groups {
            if let Some(keys) = self.role_bindings_by_group.get_mut(group) {
                keys.remove(key);
                if keys.is_empty() {
                    self.role_bindings_by_group.remove(group);
                }
            }
        }
    }

    // --- cluster role bindings ---

    pub(crate) fn apply_cluster_role_binding(&mut self, crb: k8s::ClusterRoleBinding) {
        let name = crb.name_any();
        let entry = ClusterRoleBindingEntry {
            role_ref: RoleRefTarget::from(&crb.role_ref),
            users: subjects::cluster_role_binding_subjects(SubjectKind::User, &crb),
            groups: subjects::cluster_role_binding_subjects(SubjectKind::Group, &crb),
        };
        if let Some(old) = self.cluster_role_bindings.get(&name) {
            if *old == entry {
                return;
            }
            let old = old.clone();
            self.unindex_cluster_role_binding(&name, &old);
        }
        for user in &entry.users {
            self.cluster_role_bindings_by_user
                .entry(user.clone())
                .or_default()
                .insert(name.clone());
        }
        for group in &entry.groups {
            self.cluster_role_bindings_by_group
                .entry(group.clone())
                .or_default()
                .insert(name.clone());
        }
        self.cluster_role_bindings.insert(name, entry);
        self.bump();
    }

    pub(crate) fn delete_cluster_role_binding(&mut self, name: String) {
        if let Some(entry) = self.cluster_role_bindings.remove(&name) {
            self.unindex_cluster_role_binding(&name, &entry);
            self.bump();
        }
    }

    fn unindex_cluster_role_binding(&mut self, name: &str, entry: &ClusterRoleBindingEntry) {
        for user in &entry.users {
            if let Some(names) = self.cluster_role_bindings_by_user.get_mut(user) {
                names.remove(name);
                if names.is_empty() {
                    self.cluster_role_bindings_by_user.remove(user);
                }
            }
        }
        for group in &entry.groups {
            if let Some(names) = self.cluster_role_bindings_by_group.get_mut(group) {
                names.remove(name);
                if names.is_empty() {
                    self.cluster_role_bindings_by_group.remove(group);
                }
            }
        }
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

/// An [`AccessSetLookup`] view over a shared index handle.
#[derive(Clone, Debug)]
pub struct AccessStore(SharedIndex);

impl AccessStore {
    pub fn new(index: SharedIndex) -> Self {
        Self(index)
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.0.read().changes()
    }
}

impl AccessSetLookup for AccessStore {
    fn access_for(&self, user: &UserInfo) -> AccessSet {
        self.0.read().access_for(user)
    }
}
