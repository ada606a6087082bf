#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod informer;
mod server;
mod sql_store;
mod status;
#[cfg(test)]
mod tests;

pub use self::informer::SqlInformer;
pub use self::server::{handle, serve, AppState};
pub use self::sql_store::SqlStore;
pub use self::status::Status;

use std::sync::Arc;
use tokio::sync::watch;
use vantage_schema::{ApiSchema, Collection};

/// Purges the projection caches whenever the RBAC index observes a mutation,
/// so no projection computed against older RBAC state outlives the change.
pub async fn invalidate_on_rbac_changes(
    mut changes: watch::Receiver<u64>,
    collection: Arc<Collection>,
) {
    while changes.changed().await.is_ok() {
        tracing::debug!(revision = *changes.borrow(), "RBAC changed, purging projections");
        collection.purge();
    }
}

/// The statically registered schemas. Stands in for CRD discovery, which
/// feeds the same registry when enabled.
pub fn builtin_schemas() -> Vec<ApiSchema> {
    vec![
        ApiSchema::new(
            "namespace",
            "",
            "namespaces",
            "Namespace",
            false,
            &["get", "list", "watch"],
        ),
        ApiSchema::new(
            "pod",
            "",
            "pods",
            "Pod",
            true,
            &["get", "list", "watch", "delete"],
        ),
        ApiSchema::new(
            "configmap",
            "",
            "configmaps",
            "ConfigMap",
            true,
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        ),
    ]
}
