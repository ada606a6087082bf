use crate::Index;
use kube::ResourceExt;
use vantage_k8s_api as k8s;

impl kubert::index::IndexNamespacedResource<k8s::Role> for Index {
    fn apply(&mut self, role: k8s::Role) {
        let namespace = role.namespace().unwrap_or_default();
        let name = role.name_any();
        self.apply_role(namespace, name, role.rules.unwrap_or_default());
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_role(namespace, name);
    }
}
