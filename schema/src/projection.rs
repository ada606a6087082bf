use crate::ApiSchema;
use http::Method;
use std::sync::Arc;
use vantage_core::{Access, AccessList, AccessListByVerb, AccessSet, GroupResource, ALL};

/// Projects the global schema list into the user-scoped view for one access
/// set.
///
/// A schema is included iff at least one verb survives projection (or the
/// namespace-listing rule applies); included schemas carry their permitted
/// HTTP methods and the per-verb access lists that produced them. Methods a
/// schema disallows are emitted as `blocked-<METHOD>` so clients can tell
/// "policy blocks this" apart from "this does not exist".
pub fn project(access: &AccessSet, schemas: &[Arc<ApiSchema>]) -> Vec<Arc<ApiSchema>> {
    let mut result = Vec::with_capacity(schemas.len());

    for schema in schemas {
        let gr = schema.group_resource();
        if gr.resource.is_empty() {
            result.push(schema.clone());
            continue;
        }

        let mut verb_access = AccessListByVerb::default();
        for verb in &schema.verbs {
            let mut list = access.access_list_for(verb, &gr);
            if !schema.namespaced {
                // Trim out bad data where namespaced access was granted to a
                // cluster-scoped object.
                list = list.into_iter().filter(|a| a.namespace == ALL).collect();
            }
            if !list.is_empty() {
                verb_access.insert(verb, list);
            }
        }

        let mut projected = (**schema).clone();

        if verb_access.is_empty() {
            if gr != GroupResource::namespaces() {
                continue;
            }
            // The user has no verbs on the namespaces resource itself, but it
            // may still enumerate the namespaces it can see into.
            let list: AccessList = access
                .namespaces()
                .into_iter()
                .map(|ns| Access::new(ALL, ns))
                .collect();
            if list.is_empty() {
                // Always allow list, so clients get an empty 200 rather than
                // a 403.
                projected.collection_methods.push(Method::GET.to_string());
            }
            verb_access.insert("get", list.clone());
            verb_access.insert("watch", list);
        }

        let disallowed = projected.disallow_methods.clone();
        let allowed = |method: Method| -> String {
            if disallowed.contains(method.as_str()) {
                format!("blocked-{method}")
            } else {
                method.to_string()
            }
        };

        if verb_access.any_verb(&["list", "get"]) {
            projected.resource_methods.push(allowed(Method::GET));
            projected.collection_methods.push(allowed(Method::GET));
        }
        if verb_access.any_verb(&["delete"]) {
            projected.resource_methods.push(allowed(Method::DELETE));
        }
        if verb_access.any_verb(&["update"]) {
            projected.resource_methods.push(allowed(Method::PUT));
            projected.resource_methods.push(allowed(Method::PATCH));
        }
        if verb_access.any_verb(&["create"]) {
            projected.collection_methods.push(allowed(Method::POST));
        }
        if verb_access.any_verb(&["patch"]) {
            projected.resource_methods.push(allowed(Method::PATCH));
        }

        if projected.resource_methods.is_empty() && projected.collection_methods.is_empty() {
            continue;
        }

        projected.access = Some(Arc::new(verb_access));
        result.push(Arc::new(projected));
    }

    result
}
