#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use vantage::{
    builtin_schemas, invalidate_on_rbac_changes, serve, AppState, SqlInformer, SqlStore,
};
use vantage_authn::{Authenticator, ProxyHeaderAuthenticator, UnionAuthenticator};
use vantage_core::AccessSetLookup;
use vantage_k8s_api::{self as k8s, watcher};
use vantage_k8s_index::{AccessStore, Index, IndexMetrics};
use vantage_schema::{Collection, Template};
use vantage_sqlcache::{Client, KeyChain, ObjectCache};

#[derive(Debug, Parser)]
#[clap(name = "vantage", about = "A per-user filtered view over cluster resources")]
struct Args {
    #[clap(long, default_value = "vantage=info,warn", env = "VANTAGE_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:9443")]
    http_addr: SocketAddr,

    /// Store the object cache under the system temp dir instead of the
    /// working directory.
    #[clap(long)]
    db_temp: bool,

    /// Encrypt cached object blobs at rest.
    #[clap(long)]
    encrypt_cache: bool,

    /// File listing the client certificate common names trusted for
    /// proxy-header authentication, one per line.
    #[clap(long)]
    proxy_allow_list: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        http_addr,
        db_temp,
        encrypt_cache,
        proxy_allow_list,
    } = Args::parse();

    let mut runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_admin(admin)
        .with_client(client)
        .build()
        .await?;

    let mut registry = Registry::default();

    // The RBAC index, fed by watches on all four RBAC resource types.
    let index = Index::shared();
    let rbac = IndexMetrics::register(index.clone(), &mut registry).shared();

    let roles = runtime.watch_all::<k8s::Role>(watcher::Config::default());
    tokio::spawn(kubert::index::namespaced(rbac.clone(), roles).instrument(info_span!("roles")));

    let role_bindings = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(rbac.clone(), role_bindings)
            .instrument(info_span!("rolebindings")),
    );

    let cluster_roles = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
    tokio::spawn(
        kubert::index::cluster(rbac.clone(), cluster_roles).instrument(info_span!("clusterroles")),
    );

    let cluster_role_bindings =
        runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
    tokio::spawn(
        kubert::index::cluster(rbac.clone(), cluster_role_bindings)
            .instrument(info_span!("clusterrolebindings")),
    );

    // The SQLite object cache, fed by watches on the served resource types.
    let keychain = encrypt_cache.then(|| Arc::new(KeyChain::new()));
    let db = Arc::new(Client::new(db_temp, keychain)?);
    tracing::info!(path = %db.path().display(), "informer object cache ready");
    let cancel = CancellationToken::new();

    let pod_cache = Arc::new(ObjectCache::new(db.clone(), &cancel, "pods", encrypt_cache)?);
    let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(SqlInformer::<k8s::Pod>::shared(pod_cache.clone(), cancel.clone()), pods)
            .instrument(info_span!("pods")),
    );

    let configmap_cache = Arc::new(ObjectCache::new(
        db.clone(),
        &cancel,
        "configmaps",
        encrypt_cache,
    )?);
    let configmaps = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(
            SqlInformer::<k8s::ConfigMap>::shared(configmap_cache.clone(), cancel.clone()),
            configmaps,
        )
        .instrument(info_span!("configmaps")),
    );

    // Schema registry and the per-user projection cache.
    let access: Arc<dyn AccessSetLookup> = Arc::new(AccessStore::new(index.clone()));
    let collection = Arc::new(Collection::new(access.clone()));
    collection.add_template(Template {
        id: "pod".to_string(),
        store: Some(Arc::new(SqlStore::new(pod_cache, cancel.clone()))),
        formatter: None,
    });
    collection.add_template(Template {
        id: "configmap".to_string(),
        store: Some(Arc::new(SqlStore::new(configmap_cache, cancel.clone()))),
        formatter: None,
    });
    collection.replace_schemas(builtin_schemas());

    let changes = index.read().changes();
    tokio::spawn(invalidate_on_rbac_changes(changes, collection.clone()));

    // Authentication: warm the children up before serving.
    let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();
    if let Some(path) = proxy_allow_list {
        authenticators.push(Arc::new(ProxyHeaderAuthenticator::from_file(path)));
    }
    let authn = Arc::new(UnionAuthenticator::new(authenticators));
    authn.run_once().await?;

    let state = Arc::new(AppState {
        authn,
        collection,
        access,
        registry: Arc::new(registry),
    });
    tokio::spawn(serve(http_addr, state));

    // Block on the shutdown signal; informer tasks stop with the runtime.
    let run = runtime.run().await;
    cancel.cancel();
    if run.is_err() {
        bail!("aborted");
    }
    Ok(())
}
