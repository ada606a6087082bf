use crate::Status;
use futures::future;
use hyper::{Body, Method, Request, Response};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use vantage_authn::Authenticator;
use vantage_core::{AccessSetLookup, GroupResource, UserInfo, ALL};
use vantage_schema::{ApiSchema, Collection};

pub struct AppState {
    pub authn: Arc<dyn Authenticator>,
    pub collection: Arc<Collection>,
    pub access: Arc<dyn AccessSetLookup>,
    pub registry: Arc<Registry>,
}

#[instrument(skip_all, fields(port = %addr.port()))]
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let state = state.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let state = state.clone();
                    async move { Ok::<_, hyper::Error>(handle(state, req).await) }
                },
            ))
        }));
    info!(%addr, "API server listening");
    server.await
}

/// Routes one request. Every path authenticates first: unauthenticated
/// requests are answered 401 uniformly, whether or not the path exists.
pub async fn handle(state: Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let (parts, _body) = req.into_parts();

    let user = match state.authn.authenticate(&parts).await {
        Ok(Some(user)) => user,
        Ok(None) => return Status::unauthorized().into_response(),
        Err(error) => {
            debug!(%error, "authentication failed");
            return Status::unauthorized().into_response();
        }
    };

    if parts.method != Method::GET {
        return Status::not_found().into_response();
    }

    let path: Vec<&str> = parts
        .uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let query_namespace = query_param(parts.uri.query(), "namespace");

    match path.as_slice() {
        ["metrics"] => metrics(&state),
        [] | ["v1"] => schema_collection(&state, &user),
        ["v1", "schemas"] => schema_collection(&state, &user),
        ["v1", id] => list_resource(&state, &user, id, query_namespace.as_deref()),
        ["v1", id, name] => get_resource(&state, &user, id, "", name),
        ["v1", id, namespace, name] => get_resource(&state, &user, id, namespace, name),
        _ => Status::not_found().into_response(),
    }
}

fn schema_collection(state: &AppState, user: &UserInfo) -> Response<Body> {
    let schemas = state.collection.schemas_for(user);
    json_response(&serde_json::json!({
        "resourceType": "schema",
        "data": &*schemas,
    }))
}

fn list_resource(
    state: &AppState,
    user: &UserInfo,
    id: &str,
    namespace: Option<&str>,
) -> Response<Body> {
    let schema = match projected_schema(state, user, id) {
        Ok(schema) => schema,
        Err(response) => return response,
    };
    if !allows_method(&schema.collection_methods, "GET") {
        return Status::forbidden("listing is not permitted on this resource").into_response();
    }

    // The namespaces schema always lists: the projection synthesizes its
    // access so clients can enumerate what they may see, down to an empty
    // collection.
    let gr = schema.group_resource();
    if gr != GroupResource::namespaces() {
        let access = state.access.access_for(user);
        let scope = namespace.unwrap_or(ALL);
        if !access.grants("list", &gr, scope, ALL) && !access.grants("get", &gr, scope, ALL) {
            return Status::forbidden("access denied to the requested scope").into_response();
        }
    }

    let objects = match &schema.store {
        Some(store) => match store.list(namespace) {
            Ok(objects) => objects,
            Err(error) => {
                debug!(%error, id = %schema.id, "list failed");
                return Status::internal("failed to list cached objects").into_response();
            }
        },
        None => Vec::new(),
    };
    let objects = format_objects(&schema, objects);
    json_response(&serde_json::json!({
        "resourceType": &schema.id,
        "data": objects,
    }))
}

fn get_resource(
    state: &AppState,
    user: &UserInfo,
    id: &str,
    namespace: &str,
    name: &str,
) -> Response<Body> {
    let schema = match projected_schema(state, user, id) {
        Ok(schema) => schema,
        Err(response) => return response,
    };
    if !allows_method(&schema.resource_methods, "GET") {
        return Status::forbidden("retrieval is not permitted on this resource").into_response();
    }

    let access = state.access.access_for(user);
    let scope = if namespace.is_empty() { ALL } else { namespace };
    let granted = access.grants("get", &schema.group_resource(), scope, name)
        || schema
            .access
            .as_ref()
            .is_some_and(|verb_access| verb_access.grants("get", scope, name));
    if !granted {
        return Status::forbidden("access denied to the requested object").into_response();
    }

    let store = match &schema.store {
        Some(store) => store,
        None => return Status::not_found().into_response(),
    };
    match store.get(namespace, name) {
        Ok(Some(mut obj)) => {
            if let Some(formatter) = &schema.formatter {
                formatter.format(&mut obj);
            }
            json_response(&obj)
        }
        Ok(None) => Status::not_found().into_response(),
        Err(error) => {
            debug!(%error, id = %schema.id, "get failed");
            Status::internal("failed to read cached object").into_response()
        }
    }
}

// A schema the user cannot see yields 403 when it is registered and 404 when
// it is not, so probing cannot tell "denied" apart from "absent" beyond what
// discovery already reveals.
fn projected_schema(
    state: &AppState,
    user: &UserInfo,
    id: &str,
) -> Result<Arc<ApiSchema>, Response<Body>> {
    let schemas = state.collection.schemas_for(user);
    if let Some(schema) = schemas.iter().find(|s| s.id == id) {
        return Ok(schema.clone());
    }
    if state.collection.schema_by_id(id).is_some() {
        Err(Status::forbidden("access denied to this resource type").into_response())
    } else {
        Err(Status::not_found().into_response())
    }
}

// Blocked methods surface as `blocked-GET` and friends; they exist so
// clients can render the method, but requests using them are still denied.
fn allows_method(methods: &[String], method: &str) -> bool {
    methods.iter().any(|m| m == method)
}

fn format_objects(schema: &ApiSchema, objects: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    match &schema.formatter {
        Some(formatter) => objects
            .into_iter()
            .map(|mut obj| {
                formatter.format(&mut obj);
                obj
            })
            .collect(),
        None => objects,
    }
}

fn metrics(state: &AppState) -> Response<Body> {
    let mut buf = String::new();
    if let Err(error) = prometheus_client::encoding::text::encode(&mut buf, &state.registry) {
        debug!(%error, "failed to encode metrics");
        return Status::internal("failed to encode metrics").into_response();
    }
    Response::builder()
        .status(hyper::StatusCode::OK)
        .header(
            hyper::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(Body::from(buf))
        .expect("metrics responses are well-formed")
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(hyper::StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("json responses are well-formed"),
        Err(error) => {
            debug!(%error, "failed to serialize response");
            Status::internal("failed to serialize response").into_response()
        }
    }
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}
