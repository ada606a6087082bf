use ahash::AHashMap as HashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The wildcard coordinate. Matches every namespace, resource name, verb,
/// group or resource it stands in for.
pub const ALL: &str = "*";

/// A group/resource pair, e.g. `apps`/`deployments`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl ToString, resource: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }

    /// The core-group `namespaces` resource, which gets special treatment
    /// throughout access compilation.
    pub fn namespaces() -> Self {
        Self::new("", "namespaces")
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// A single access record: which namespace and which object name a grant
/// applies to. Either coordinate may be [`ALL`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    pub namespace: String,
    pub resource_name: String,
}

impl Access {
    pub fn new(namespace: impl ToString, resource_name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            resource_name: resource_name.to_string(),
        }
    }

    /// True if every object matched by `other` is also matched by `self`.
    pub fn covers(&self, other: &Access) -> bool {
        (self.namespace == ALL || self.namespace == other.namespace)
            && (self.resource_name == ALL || self.resource_name == other.resource_name)
    }

    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        (self.namespace == ALL || self.namespace == namespace)
            && (self.resource_name == ALL || self.resource_name == name)
    }
}

/// The access records stored under one `(verb, group, resource)` key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccessList(Vec<Access>);

impl AccessList {
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        self.0.iter().any(|a| a.grants(namespace, name))
    }

    pub fn push(&mut self, access: Access) {
        self.0.push(access);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Access> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Access> for AccessList {
    fn from_iter<T: IntoIterator<Item = Access>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for AccessList {
    type Item = Access;
    type IntoIter = std::vec::IntoIter<Access>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Per-verb access lists, as attached to a projected schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AccessListByVerb(HashMap<String, AccessList>);

impl AccessListByVerb {
    /// True if any of the given verbs has at least one access record.
    pub fn any_verb(&self, verbs: &[&str]) -> bool {
        verbs
            .iter()
            .any(|v| self.0.get(*v).is_some_and(|l| !l.is_empty()))
    }

    pub fn grants(&self, verb: &str, namespace: &str, name: &str) -> bool {
        self.0
            .get(verb)
            .is_some_and(|l| l.grants(namespace, name))
    }

    pub fn insert(&mut self, verb: impl ToString, list: AccessList) {
        self.0.insert(verb.to_string(), list);
    }

    pub fn get(&self, verb: &str) -> Option<&AccessList> {
        self.0.get(verb)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    verb: String,
    gr: GroupResource,
}

/// Canonical per-user authorization summary keyed by `(verb, group,
/// resource)`.
///
/// The set is kept in canonical form as records are added: a record covered
/// by an existing wildcard record is absorbed, and adding a wildcard record
/// drops the concrete records it covers. Ordered maps make the fingerprint a
/// pure function of the semantic content, independent of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSet {
    set: BTreeMap<Key, BTreeSet<Access>>,
}

impl AccessSet {
    /// Idempotent, canonicalizing insertion.
    pub fn add(&mut self, verb: impl ToString, gr: GroupResource, access: Access) {
        let entries = self
            .set
            .entry(Key {
                verb: verb.to_string(),
                gr,
            })
            .or_default();
        if entries.iter().any(|existing| existing.covers(&access)) {
            return;
        }
        entries.retain(|existing| !access.covers(existing));
        entries.insert(access);
    }

    /// Unions `other` into `self`, preserving canonical form.
    pub fn merge(&mut self, other: &AccessSet) {
        for (key, accesses) in &other.set {
            for access in accesses {
                self.add(&key.verb, key.gr.clone(), access.clone());
            }
        }
    }

    /// Every record stored under the verb, including records stored under the
    /// wildcard verb.
    pub fn access_list_for(&self, verb: &str, gr: &GroupResource) -> AccessList {
        let mut result = BTreeSet::new();
        for v in [verb, ALL] {
            if let Some(entries) = self.set.get(&Key {
                verb: v.to_string(),
                gr: gr.clone(),
            }) {
                result.extend(entries.iter().cloned());
            }
        }
        result.into_iter().collect()
    }

    /// True iff some stored record has matching or wildcard coordinates.
    pub fn grants(&self, verb: &str, gr: &GroupResource, namespace: &str, name: &str) -> bool {
        let group_resources = [
            gr.clone(),
            GroupResource::new(&gr.group, ALL),
            GroupResource::new(ALL, ALL),
        ];
        for v in [verb, ALL] {
            for gr in &group_resources {
                let key = Key {
                    verb: v.to_string(),
                    gr: gr.clone(),
                };
                if self
                    .set
                    .get(&key)
                    .is_some_and(|entries| entries.iter().any(|a| a.grants(namespace, name)))
                {
                    return true;
                }
            }
        }
        false
    }

    /// The namespaces the subject may `get`, by name: namespaces it may get
    /// objects in, plus namespace objects it may see directly. Wildcard
    /// records do not contribute; they are reflected in `grants` instead.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for (key, accesses) in &self.set {
            if key.verb != "get" && key.verb != ALL {
                continue;
            }
            for access in accesses {
                if access.namespace != ALL {
                    names.insert(access.namespace.clone());
                }
                if key.gr == GroupResource::namespaces() && access.resource_name != ALL {
                    names.insert(access.resource_name.clone());
                }
            }
        }
        names.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.set.values().all(|entries| entries.is_empty())
    }

    /// Deterministic fingerprint of the set's semantic content, used as the
    /// projection cache key. The empty set hashes to the digest of no input,
    /// which no non-empty set can produce.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, accesses) in &self.set {
            for access in accesses {
                for part in [
                    key.verb.as_str(),
                    key.gr.group.as_str(),
                    key.gr.resource.as_str(),
                    access.namespace.as_str(),
                    access.resource_name.as_str(),
                ] {
                    hasher.update(part.as_bytes());
                    hasher.update([0u8]);
                }
                hasher.update(b"\n");
            }
        }
        hex::encode(hasher.finalize())
    }
}
