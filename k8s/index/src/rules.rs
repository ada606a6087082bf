use vantage_core::{Access, AccessSet, GroupResource, ALL};
use vantage_k8s_api as k8s;

/// Expands one policy rule, scoped to a binding namespace, into access
/// records.
///
/// The cross-product of the rule's groups, resources, resource names and
/// verbs is materialized; empty `resource_names` grants every name. The
/// `namespaces` resource is rewritten so that "may act on namespaces within
/// N" collapses to "may see the namespace object N", encoded as
/// `(namespace=*, resource_name=N)`. This applies both when the rule names no
/// namespaces and when it names the binding namespace itself.
pub fn add_resource_access(set: &mut AccessSet, namespace: &str, rule: &k8s::PolicyRule) {
    let groups = rule.api_groups.as_deref().unwrap_or_default();
    let resources = rule.resources.as_deref().unwrap_or_default();
    let all_names = [ALL.to_string()];
    let names: &[String] = match rule.resource_names.as_deref() {
        Some(names) if !names.is_empty() => names,
        _ => &all_names,
    };

    for group in groups {
        for resource in resources {
            for resource_name in names {
                for verb in &rule.verbs {
                    let access = if resource == "namespaces"
                        && (namespace == resource_name.as_str()
                            || (resource_name == ALL && namespace != ALL))
                    {
                        Access::new(ALL, namespace)
                    } else {
                        Access::new(namespace, resource_name)
                    };
                    set.add(verb, GroupResource::new(group, resource), access);
                }
            }
        }
    }
}
