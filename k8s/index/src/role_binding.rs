use crate::Index;
use vantage_k8s_api as k8s;

impl kubert::index::IndexNamespacedResource<k8s::RoleBinding> for Index {
    fn apply(&mut self, rb: k8s::RoleBinding) {
        self.apply_role_binding(rb);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_role_binding(namespace, name);
    }
}
