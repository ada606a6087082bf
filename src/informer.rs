use kube::ResourceExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vantage_sqlcache::{object_key, ObjectCache};

/// Mirrors one watched resource type into the SQLite object cache.
///
/// A failed upsert leaves the previous row in place; the watch stream
/// redelivers the object on the next change, so the cache converges without
/// local retries.
pub struct SqlInformer<R> {
    cache: Arc<ObjectCache>,
    cancel: CancellationToken,
    _marker: PhantomData<fn(R)>,
}

impl<R> SqlInformer<R> {
    pub fn shared(cache: Arc<ObjectCache>, cancel: CancellationToken) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            cache,
            cancel,
            _marker: PhantomData,
        }))
    }
}

impl<R> kubert::index::IndexNamespacedResource<R> for SqlInformer<R>
where
    R: kube::Resource<DynamicType = ()> + Serialize,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        let name = resource.name_any();
        let key = object_key(&namespace, &name);
        if let Err(error) = self.cache.upsert(&self.cancel, &key, &resource) {
            tracing::error!(%error, %key, "failed to cache object");
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = object_key(&namespace, &name);
        if let Err(error) = self.cache.delete(&self.cancel, &key) {
            tracing::error!(%error, %key, "failed to evict cached object");
        }
    }
}
