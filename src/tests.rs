use crate::{builtin_schemas, handle, AppState, SqlStore, Status};
use hyper::{Body, Request, StatusCode};
use prometheus_client::registry::Registry;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vantage_authn::{AuthenticatorFn, UnionAuthenticator};
use vantage_core::{Access, AccessSet, AccessSetLookup, GroupResource, UserInfo, ALL};
use vantage_schema::{Collection, Template};
use vantage_sqlcache::{object_key, Client, ObjectCache};

/// Grants alice get/list on pods in ns-1 and nothing to anyone else.
struct StaticLookup;

impl AccessSetLookup for StaticLookup {
    fn access_for(&self, user: &UserInfo) -> AccessSet {
        let mut set = AccessSet::default();
        if user.name == "alice" {
            for verb in ["get", "list"] {
                set.add(verb, GroupResource::new("", "pods"), Access::new("ns-1", ALL));
            }
        }
        set
    }
}

fn test_state() -> (Arc<AppState>, Arc<ObjectCache>, CancellationToken) {
    let cancel = CancellationToken::new();
    let db = Arc::new(Client::new(true, None).expect("temp database must open"));
    let pod_cache =
        Arc::new(ObjectCache::new(db, &cancel, "pods", false).expect("table must be created"));

    let access: Arc<dyn AccessSetLookup> = Arc::new(StaticLookup);
    let collection = Arc::new(Collection::new(access.clone()));
    collection.add_template(Template {
        id: "pod".to_string(),
        store: Some(Arc::new(SqlStore::new(pod_cache.clone(), cancel.clone()))),
        formatter: None,
    });
    collection.replace_schemas(builtin_schemas());

    let authn = Arc::new(UnionAuthenticator::new(vec![Arc::new(AuthenticatorFn(
        |parts: &http::request::Parts| -> anyhow::Result<Option<UserInfo>> {
            Ok(parts
                .headers
                .get("x-test-user")
                .and_then(|v| v.to_str().ok())
                .map(|name| UserInfo::with_groups(name, ["my-group"])))
        },
    ))]));

    let state = Arc::new(AppState {
        authn,
        collection,
        access,
        registry: Arc::new(Registry::default()),
    });
    (state, pod_cache, cancel)
}

fn request(user: Option<&str>, path: &str) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(user) = user {
        builder = builder.header("x-test-user", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: hyper::Response<Body>) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn pod_object(namespace: &str, name: &str) -> Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "namespace": namespace, "name": name },
    })
}

#[tokio::test]
async fn unauthenticated_requests_get_the_canonical_401_everywhere() {
    let (state, _cache, _cancel) = test_state();
    for path in ["/", "/v1", "/v1/pod", "/v1/pod/ns-1/pod-a", "/metrics", "/unknown"] {
        let response = handle(state.clone(), request(None, path)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");

        let status: Status = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(status, Status::unauthorized(), "{path}");
    }
}

#[tokio::test]
async fn authenticated_requests_to_unknown_paths_get_404() {
    let (state, _cache, _cancel) = test_state();
    for path in ["/unknown", "/v1/unregistered-type", "/a/b/c/d/e"] {
        let response = handle(state.clone(), request(Some("alice"), path)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn schema_listing_reflects_the_projection() {
    let (state, _cache, _cancel) = test_state();
    let response = handle(state.clone(), request(Some("alice"), "/v1")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"pod"));
    // The namespaces schema always lists, even without explicit grants.
    assert!(ids.contains(&"namespace"));
    assert!(!ids.contains(&"configmap"));
}

#[tokio::test]
async fn listing_is_scoped_to_granted_namespaces() {
    let (state, cache, cancel) = test_state();
    for (ns, name) in [("ns-1", "pod-a"), ("ns-1", "pod-b"), ("ns-2", "pod-c")] {
        cache
            .upsert(&cancel, &object_key(ns, name), &pod_object(ns, name))
            .unwrap();
    }

    let response = handle(state.clone(), request(Some("alice"), "/v1/pod?namespace=ns-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    // No grant covers every namespace, so an unscoped list is denied.
    let response = handle(state.clone(), request(Some("alice"), "/v1/pod")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = handle(
        state.clone(),
        request(Some("alice"), "/v1/pod?namespace=ns-2"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn get_serves_cached_objects_the_user_may_see() {
    let (state, cache, cancel) = test_state();
    cache
        .upsert(&cancel, &object_key("ns-1", "pod-a"), &pod_object("ns-1", "pod-a"))
        .unwrap();
    cache
        .upsert(&cancel, &object_key("ns-2", "pod-c"), &pod_object("ns-2", "pod-c"))
        .unwrap();

    let response = handle(state.clone(), request(Some("alice"), "/v1/pod/ns-1/pod-a")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["metadata"]["name"], "pod-a");

    let response = handle(state.clone(), request(Some("alice"), "/v1/pod/ns-2/pod-c")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = handle(state.clone(), request(Some("alice"), "/v1/pod/ns-1/absent")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn namespace_listing_returns_an_empty_200_rather_than_403() {
    let (state, _cache, _cancel) = test_state();
    // bob has no grants at all, but may still list namespaces.
    let response = handle(state.clone(), request(Some("bob"), "/v1/namespace")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn registered_but_unprojected_types_are_denied_not_hidden() {
    let (state, _cache, _cancel) = test_state();
    let response = handle(state.clone(), request(Some("alice"), "/v1/configmap")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn informer_deltas_are_visible_to_subsequent_reads() {
    use kubert::index::IndexNamespacedResource;

    let (state, cache, cancel) = test_state();
    let informer = crate::SqlInformer::<vantage_k8s_api::Pod>::shared(cache, cancel);

    let pod = vantage_k8s_api::Pod {
        metadata: vantage_k8s_api::ObjectMeta {
            namespace: Some("ns-1".to_string()),
            name: Some("pod-a".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    informer.write().apply(pod);

    let response = handle(state.clone(), request(Some("alice"), "/v1/pod/ns-1/pod-a")).await;
    assert_eq!(response.status(), StatusCode::OK);

    informer
        .write()
        .delete("ns-1".to_string(), "pod-a".to_string());
    let response = handle(state.clone(), request(Some("alice"), "/v1/pod/ns-1/pod-a")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
