//! Per-user schema projection.
//!
//! The global schema list (produced by out-of-tree discovery) is projected,
//! per access-set fingerprint, into the set of schemas a user may see, with
//! the permitted HTTP methods filled in. Projections are memoized by
//! fingerprint with a per-user eviction slot so that a permission change
//! never leaves a stale projection behind.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod collection;
mod projection;

pub use self::collection::{Collection, Template};
pub use self::projection::project;

use ahash::AHashSet as HashSet;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use vantage_core::{AccessListByVerb, GroupResource};

/// Rewrites an object before it is returned to a client.
pub trait Formatter: Send + Sync {
    fn format(&self, obj: &mut serde_json::Value);
}

/// Serves list/get for one schema, typically backed by the informer object
/// cache.
pub trait Store: Send + Sync {
    fn list(&self, namespace: Option<&str>) -> anyhow::Result<Vec<serde_json::Value>>;

    fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// One entry of the schema registry.
///
/// `resource_methods`, `collection_methods` and `access` are projection
/// outputs; on registry entries they are empty.
#[derive(Clone, Default)]
pub struct ApiSchema {
    pub id: String,
    pub group: String,
    pub resource: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
    pub disallow_methods: HashSet<String>,

    pub resource_methods: Vec<String>,
    pub collection_methods: Vec<String>,
    pub access: Option<Arc<AccessListByVerb>>,

    pub formatter: Option<Arc<dyn Formatter>>,
    pub store: Option<Arc<dyn Store>>,
}

impl ApiSchema {
    pub fn new(
        id: impl ToString,
        group: impl ToString,
        resource: impl ToString,
        kind: impl ToString,
        namespaced: bool,
        verbs: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            group: group.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
            namespaced,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.group, &self.resource)
    }
}

impl fmt::Debug for ApiSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSchema")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("resource", &self.resource)
            .field("kind", &self.kind)
            .field("namespaced", &self.namespaced)
            .field("verbs", &self.verbs)
            .field("resource_methods", &self.resource_methods)
            .field("collection_methods", &self.collection_methods)
            .finish_non_exhaustive()
    }
}

impl Serialize for ApiSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ApiSchema", 9)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("group", &self.group)?;
        s.serialize_field("resource", &self.resource)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("namespaced", &self.namespaced)?;
        s.serialize_field("verbs", &self.verbs)?;
        s.serialize_field("resourceMethods", &self.resource_methods)?;
        s.serialize_field("collectionMethods", &self.collection_methods)?;
        match &self.access {
            Some(access) => s.serialize_field("access", access.as_ref())?,
            None => s.skip_field("access")?,
        }
        s.end()
    }
}
