use crate::Index;
use vantage_k8s_api as k8s;

impl kubert::index::IndexClusterResource<k8s::ClusterRoleBinding> for Index {
    fn apply(&mut self, crb: k8s::ClusterRoleBinding) {
        self.apply_cluster_role_binding(crb);
    }

    fn delete(&mut self, name: String) {
        self.delete_cluster_role_binding(name);
    }
}
