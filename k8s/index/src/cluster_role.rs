use crate::Index;
use kube::ResourceExt;
use vantage_k8s_api as k8s;

impl kubert::index::IndexClusterResource<k8s::ClusterRole> for Index {
    fn apply(&mut self, role: k8s::ClusterRole) {
        let name = role.name_any();
        self.apply_cluster_role(name, role.rules.unwrap_or_default());
    }

    fn delete(&mut self, name: String) {
        self.delete_cluster_role(name);
    }
}
