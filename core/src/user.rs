use std::collections::BTreeMap;

/// Group guaranteed to be present on every successfully authenticated
/// identity.
pub const AUTHENTICATED_GROUP: &str = "system:authenticated";

/// A resolved user identity, as produced by the authenticator union.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_groups<I>(name: impl ToString, groups: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Self {
            name: name.to_string(),
            groups: groups.into_iter().map(|g| g.to_string()).collect(),
            extra: BTreeMap::new(),
        }
    }
}

/// The synthetic user name under which a service account authenticates.
pub fn service_account_user_name(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{namespace}:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_name_format() {
        assert_eq!(
            service_account_user_name("testns", "mysvcaccount"),
            "system:serviceaccount:testns:mysvcaccount"
        );
    }
}
