use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vantage_schema::Store;
use vantage_sqlcache::{object_key, ObjectCache};

/// Serves a schema's list/get traffic from the informer object cache.
#[derive(Debug)]
pub struct SqlStore {
    cache: Arc<ObjectCache>,
    cancel: CancellationToken,
}

impl SqlStore {
    pub fn new(cache: Arc<ObjectCache>, cancel: CancellationToken) -> Self {
        Self { cache, cancel }
    }
}

impl Store for SqlStore {
    fn list(&self, namespace: Option<&str>) -> anyhow::Result<Vec<serde_json::Value>> {
        Ok(self.cache.list(&self.cancel, namespace)?)
    }

    fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.cache.get(&self.cancel, &object_key(namespace, name))?)
    }
}
