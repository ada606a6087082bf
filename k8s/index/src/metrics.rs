use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps an index handle, counting applies and deletes by resource kind.
pub struct IndexMetrics<T> {
    inner: T,

    index_applies: Family<KindLabels, Counter>,
    index_deletes: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        Self {
            inner,
            index_applies,
            index_deletes,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: kubert::index::IndexNamespacedResource<R>,
    R: kube::Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.index_deletes
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().delete(namespace, name);
    }
}

impl<R, T> kubert::index::IndexClusterResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: kubert::index::IndexClusterResource<R>,
    R: kube::Resource<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
    }

    fn delete(&mut self, name: String) {
        self.index_deletes
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().delete(name);
    }
}
