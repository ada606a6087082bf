use super::*;
use vantage_core::{Access, GroupResource};
use vantage_k8s_api::RBAC_GROUP;

fn role_ref(kind: &str, name: &str) -> k8s::RoleRef {
    k8s::RoleRef {
        api_group: RBAC_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn subject(api_group: &str, kind: &str, name: &str) -> k8s::Subject {
    k8s::Subject {
        api_group: Some(api_group.to_string()),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

fn service_account(namespace: &str, name: &str) -> k8s::Subject {
    k8s::Subject {
        api_group: Some(String::new()),
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
    }
}

fn mk_rb(
    namespace: &str,
    name: &str,
    role_ref: k8s::RoleRef,
    subjects: Vec<k8s::Subject>,
) -> k8s::RoleBinding {
    k8s::RoleBinding {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref,
        subjects: Some(subjects),
    }
}

fn mk_crb(name: &str, role_ref: k8s::RoleRef, subjects: Vec<k8s::Subject>) -> k8s::ClusterRoleBinding {
    k8s::ClusterRoleBinding {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref,
        subjects: Some(subjects),
    }
}

fn rule(groups: &[&str], resources: &[&str], names: &[&str], verbs: &[&str]) -> k8s::PolicyRule {
    k8s::PolicyRule {
        api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        resource_names: Some(names.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

mod role_binding_subjects {
    use super::*;

    #[test]
    fn indexes_users() {
        let rb = mk_rb(
            "testns",
            "testrb",
            role_ref("Role", "testrole"),
            vec![subject(RBAC_GROUP, "User", "myuser")],
        );
        assert_eq!(
            role_binding_subjects(SubjectKind::User, &rb),
            vec!["myuser".to_string()]
        );
    }

    #[test]
    fn indexes_multiple_subjects() {
        let rb = mk_rb(
            "testns",
            "testrb",
            role_ref("Role", "testrole"),
            vec![
                subject(RBAC_GROUP, "Group", "mygroup1"),
                subject(RBAC_GROUP, "Group", "mygroup2"),
            ],
        );
        assert_eq!(
            role_binding_subjects(SubjectKind::Group, &rb),
            vec!["mygroup1".to_string(), "mygroup2".to_string()]
        );
    }

    #[test]
    fn indexes_service_accounts_in_user_mode() {
        let rb = mk_rb(
            "testns",
            "testrb",
            role_ref("Role", "testrole"),
            vec![service_account("testns", "mysvcaccount")],
        );
        assert_eq!(
            role_binding_subjects(SubjectKind::User, &rb),
            vec!["system:serviceaccount:testns:mysvcaccount".to_string()]
        );
    }

    #[test]
    fn ignores_service_accounts_in_group_mode() {
        let rb = mk_rb(
            "testns",
            "testrb",
            role_ref("Role", "testrole"),
            vec![service_account("testns", "mysvcaccount")],
        );
        assert!(role_binding_subjects(SubjectKind::Group, &rb).is_empty());
    }

    #[test]
    fn ignores_unknown_subjects() {
        let rb = mk_rb(
            "testns",
            "testrb",
            role_ref("Role", "testrole"),
            vec![
                subject(RBAC_GROUP, "User", "myuser"),
                subject(RBAC_GROUP, "Group", "mygroup1"),
                subject("custom.api.group", "CustomGroup", "mygroup2"),
            ],
        );
        assert_eq!(
            role_binding_subjects(SubjectKind::Group, &rb),
            vec!["mygroup1".to_string()]
        );
    }
}

mod cluster_role_binding_subjects {
    use super::*;

    #[test]
    fn ignores_bindings_whose_role_ref_is_a_role() {
        let crb = mk_crb(
            "testcrb",
            role_ref("Role", "testrole"),
            vec![subject(RBAC_GROUP, "User", "myuser")],
        );
        assert!(cluster_role_binding_subjects(SubjectKind::User, &crb).is_empty());
    }

    #[test]
    fn indexes_users() {
        let crb = mk_crb(
            "testcrb",
            role_ref("ClusterRole", "testclusterrole"),
            vec![subject(RBAC_GROUP, "User", "myuser")],
        );
        assert_eq!(
            cluster_role_binding_subjects(SubjectKind::User, &crb),
            vec!["myuser".to_string()]
        );
    }

    #[test]
    fn indexes_service_accounts_in_user_mode() {
        let crb = mk_crb(
            "testcrb",
            role_ref("ClusterRole", "testclusterrole"),
            vec![service_account("testns", "mysvcaccount")],
        );
        assert_eq!(
            cluster_role_binding_subjects(SubjectKind::User, &crb),
            vec!["system:serviceaccount:testns:mysvcaccount".to_string()]
        );
    }

    #[test]
    fn ignores_service_accounts_in_group_mode() {
        let crb = mk_crb(
            "testcrb",
            role_ref("ClusterRole", "testclusterrole"),
            vec![service_account("testns", "mysvcaccount")],
        );
        assert!(cluster_role_binding_subjects(SubjectKind::Group, &crb).is_empty());
    }
}

mod resource_access {
    use super::*;

    fn expand(namespace: &str, rule: &k8s::PolicyRule) -> AccessSet {
        let mut set = AccessSet::default();
        add_resource_access(&mut set, namespace, rule);
        set
    }

    #[test]
    fn namespaced_binding_with_empty_names() {
        let set = expand("test-ns", &rule(&[""], &["namespaces", "deployments"], &[], &["get"]));

        let namespaces = set.access_list_for("get", &GroupResource::namespaces());
        assert_eq!(
            namespaces.iter().collect::<Vec<_>>(),
            vec![&Access::new("*", "test-ns")]
        );

        let deployments = set.access_list_for("get", &GroupResource::new("", "deployments"));
        assert_eq!(
            deployments.iter().collect::<Vec<_>>(),
            vec![&Access::new("test-ns", "*")]
        );
    }

    #[test]
    fn cluster_binding_with_empty_names() {
        let set = expand("*", &rule(&[""], &["namespaces", "deployments"], &[], &["get"]));

        for gr in [GroupResource::namespaces(), GroupResource::new("", "deployments")] {
            let list = set.access_list_for("get", &gr);
            assert_eq!(list.iter().collect::<Vec<_>>(), vec![&Access::new("*", "*")]);
        }
    }

    #[test]
    fn namespaces_resource_with_specific_name() {
        let set = expand("test-ns", &rule(&[""], &["namespaces"], &["specific-ns"], &["get"]));
        let list = set.access_list_for("get", &GroupResource::namespaces());
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![&Access::new("test-ns", "specific-ns")]
        );
    }

    #[test]
    fn namespaces_resource_named_after_its_own_namespace() {
        let set = expand("test-ns", &rule(&[""], &["namespaces"], &["test-ns"], &["get"]));
        let list = set.access_list_for("get", &GroupResource::namespaces());
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![&Access::new("*", "test-ns")]
        );
    }

    #[test]
    fn other_resource_with_specific_name() {
        let set = expand(
            "test-ns",
            &rule(&["apps"], &["deployments"], &["my-deploy"], &["get"]),
        );
        let list = set.access_list_for("get", &GroupResource::new("apps", "deployments"));
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![&Access::new("test-ns", "my-deploy")]
        );
    }

    #[test]
    fn cluster_binding_for_other_resource() {
        let set = expand("*", &rule(&["apps"], &["deployments"], &[], &["get"]));
        let list = set.access_list_for("get", &GroupResource::new("apps", "deployments"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![&Access::new("*", "*")]);
    }
}

mod access_for {
    use super::*;

    fn user(name: &str, groups: &[&str]) -> UserInfo {
        UserInfo::with_groups(name, groups.iter().copied())
    }

    #[test]
    fn composes_role_and_cluster_role_bindings() {
        let mut index = Index::new();
        index.apply_role(
            "test-ns".to_string(),
            "reader".to_string(),
            vec![rule(&["apps"], &["deployments"], &[], &["get", "list"])],
        );
        index.apply_cluster_role(
            "node-viewer".to_string(),
            vec![rule(&[""], &["nodes"], &[], &["get"])],
        );
        index.apply_role_binding(mk_rb(
            "test-ns",
            "reader-binding",
            role_ref("Role", "reader"),
            vec![subject(RBAC_GROUP, "User", "alice")],
        ));
        index.apply_cluster_role_binding(mk_crb(
            "node-viewers",
            role_ref("ClusterRole", "node-viewer"),
            vec![subject(RBAC_GROUP, "Group", "ops")],
        ));

        let set = index.access_for(&user("alice", &["ops"]));
        assert!(set.grants("get", &GroupResource::new("apps", "deployments"), "test-ns", "x"));
        assert!(set.grants("list", &GroupResource::new("apps", "deployments"), "test-ns", "x"));
        assert!(!set.grants("get", &GroupResource::new("apps", "deployments"), "other-ns", "x"));
        assert!(set.grants("get", &GroupResource::new("", "nodes"), "*", "node-1"));

        // Neither binding mentions bob.
        assert!(index.access_for(&user("bob", &[])).is_empty());
    }

    #[test]
    fn cluster_role_referenced_from_role_binding_is_scoped_to_the_binding_namespace() {
        let mut index = Index::new();
        index.apply_cluster_role(
            "pod-reader".to_string(),
            vec![rule(&[""], &["pods"], &[], &["get"])],
        );
        index.apply_role_binding(mk_rb(
            "test-ns",
            "pods-binding",
            role_ref("ClusterRole", "pod-reader"),
            vec![subject(RBAC_GROUP, "User", "alice")],
        ));

        let set = index.access_for(&user("alice", &[]));
        assert!(set.grants("get", &GroupResource::new("", "pods"), "test-ns", "x"));
        assert!(!set.grants("get", &GroupResource::new("", "pods"), "other-ns", "x"));
    }

    #[test]
    fn unresolvable_role_ref_expands_to_nothing() {
        let mut index = Index::new();
        index.apply_role_binding(mk_rb(
            "test-ns",
            "dangling",
            role_ref("Role", "missing"),
            vec![subject(RBAC_GROUP, "User", "alice")],
        ));
        assert!(index.access_for(&user("alice", &[])).is_empty());
    }

    #[test]
    fn deleting_a_binding_revokes_access() {
        let mut index = Index::new();
        index.apply_role(
            "test-ns".to_string(),
            "reader".to_string(),
            vec![rule(&["apps"], &["deployments"], &[], &["get"])],
        );
        index.apply_role_binding(mk_rb(
            "test-ns",
            "reader-binding",
            role_ref("Role", "reader"),
            vec![subject(RBAC_GROUP, "User", "alice")],
        ));
        assert!(!index.access_for(&user("alice", &[])).is_empty());

        index.delete_role_binding("test-ns".to_string(), "reader-binding".to_string());
        assert!(index.access_for(&user("alice", &[])).is_empty());
    }

    #[test]
    fn mutations_bump_the_revision() {
        let mut index = Index::new();
        let rx = index.changes();
        assert_eq!(*rx.borrow(), 0);

        index.apply_role(
            "test-ns".to_string(),
            "reader".to_string(),
            vec![rule(&["apps"], &["deployments"], &[], &["get"])],
        );
        assert_eq!(*rx.borrow(), 1);

        // Re-applying the same role is a no-op.
        index.apply_role(
            "test-ns".to_string(),
            "reader".to_string(),
            vec![rule(&["apps"], &["deployments"], &[], &["get"])],
        );
        assert_eq!(*rx.borrow(), 1);

        index.delete_role("test-ns".to_string(), "reader".to_string());
        assert_eq!(*rx.borrow(), 2);
    }
}
