use crate::{Authenticator, ClientIdentity};
use ahash::AHashSet as HashSet;
use anyhow::{Context, Result};
use http::request::Parts;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use vantage_core::UserInfo;

const USER_HEADER: &str = "x-remote-user";
const GROUP_HEADER: &str = "x-remote-group";
const EXTRA_PREFIX: &str = "x-remote-extra-";

/// Trusts identity headers set by an authenticating front proxy.
///
/// Headers are honored only when the request carries a verified client
/// certificate identity whose common name is in the allow-list; anything else
/// is simply not recognized, so the union falls through to the next strategy
/// (and ultimately to a 401).
pub struct ProxyHeaderAuthenticator {
    allow_list_path: Option<PathBuf>,
    allowed_common_names: RwLock<HashSet<String>>,
}

impl ProxyHeaderAuthenticator {
    pub fn new<I>(allowed_common_names: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Self {
            allow_list_path: None,
            allowed_common_names: RwLock::new(
                allowed_common_names
                    .into_iter()
                    .map(|cn| cn.to_string())
                    .collect(),
            ),
        }
    }

    /// Reads the allow-list from a file, one common name per line. The file
    /// is loaded by [`Authenticator::run_once`].
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            allow_list_path: Some(path.into()),
            allowed_common_names: RwLock::new(HashSet::default()),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for ProxyHeaderAuthenticator {
    async fn run_once(&self) -> Result<()> {
        let path = match &self.allow_list_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading proxy allow-list {}", path.display()))?;
        let allowed: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        tracing::debug!(count = allowed.len(), "loaded proxy allow-list");
        *self.allowed_common_names.write() = allowed;
        Ok(())
    }

    async fn authenticate(&self, req: &Parts) -> Result<Option<UserInfo>> {
        let identity = match req.extensions.get::<ClientIdentity>() {
            Some(identity) => identity,
            None => return Ok(None),
        };
        if !self
            .allowed_common_names
            .read()
            .contains(&identity.common_name)
        {
            tracing::debug!(cn = %identity.common_name, "client certificate not in allow-list");
            return Ok(None);
        }

        let name = match req.headers.get(USER_HEADER).and_then(|v| v.to_str().ok()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Ok(None),
        };

        let groups = req
            .headers
            .get_all(GROUP_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (header, value) in &req.headers {
            if let Some(key) = header.as_str().strip_prefix(EXTRA_PREFIX) {
                if let Ok(value) = value.to_str() {
                    extra
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }

        Ok(Some(UserInfo {
            name,
            groups,
            extra,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request(identity: Option<ClientIdentity>) -> Parts {
        let mut builder = http::Request::builder()
            .uri("/apis")
            .header("x-remote-user", "my-user")
            .header("x-remote-group", "my-group")
            .header("x-remote-extra-scopes", "read");
        if let Some(identity) = identity {
            builder = builder.extension(identity);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn cn(name: &str) -> ClientIdentity {
        ClientIdentity {
            common_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn resolves_identity_headers_behind_a_trusted_certificate() {
        let authn = ProxyHeaderAuthenticator::new(["front-proxy"]);
        let user = authn
            .authenticate(&request(Some(cn("front-proxy"))))
            .await
            .unwrap()
            .expect("request must authenticate");
        assert_eq!(user.name, "my-user");
        assert_eq!(user.groups, vec!["my-group"]);
        assert_eq!(user.extra["scopes"], vec!["read"]);
    }

    #[tokio::test]
    async fn ignores_headers_without_a_client_certificate() {
        let authn = ProxyHeaderAuthenticator::new(["front-proxy"]);
        assert!(authn.authenticate(&request(None)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ignores_certificates_outside_the_allow_list() {
        let authn = ProxyHeaderAuthenticator::new(["front-proxy"]);
        assert!(authn
            .authenticate(&request(Some(cn("imposter"))))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn union_yields_the_full_identity_for_proxied_requests() {
        use crate::UnionAuthenticator;
        use std::sync::Arc;
        use vantage_core::AUTHENTICATED_GROUP;

        let union = UnionAuthenticator::new(vec![Arc::new(ProxyHeaderAuthenticator::new([
            "front-proxy",
        ]))]);
        let user = union
            .authenticate(&request(Some(cn("front-proxy"))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.name, "my-user");
        assert_eq!(user.groups, vec!["my-group", AUTHENTICATED_GROUP]);
    }

    #[tokio::test]
    async fn run_once_loads_the_allow_list_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# trusted proxies").unwrap();
        writeln!(file, "front-proxy").unwrap();
        file.flush().unwrap();

        let authn = ProxyHeaderAuthenticator::from_file(file.path());
        // Cold: nothing is trusted yet.
        assert!(authn
            .authenticate(&request(Some(cn("front-proxy"))))
            .await
            .unwrap()
            .is_none());

        authn.run_once().await.unwrap();
        assert!(authn
            .authenticate(&request(Some(cn("front-proxy"))))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn run_once_propagates_missing_file_errors() {
        let authn = ProxyHeaderAuthenticator::from_file("/does/not/exist");
        assert!(authn.run_once().await.is_err());
    }
}
