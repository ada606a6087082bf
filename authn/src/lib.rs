//! Request authentication.
//!
//! Authenticators consume already-framed requests and resolve them to user
//! identities; the union composes several strategies and guarantees every
//! successful identity carries the `system:authenticated` group. TLS
//! termination happens upstream; the listener records the verified client
//! certificate identity as a request extension for the proxy-header
//! authenticator to consult.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod proxy;

pub use self::proxy::ProxyHeaderAuthenticator;

use anyhow::Result;
use http::request::Parts;
use std::sync::Arc;
use vantage_core::{UserInfo, AUTHENTICATED_GROUP};

/// The verified client certificate identity, inserted into request
/// extensions by the TLS listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub common_name: String,
}

/// Resolves a request to a user identity.
///
/// `Ok(None)` means "this strategy does not recognize the request"; an error
/// means the strategy failed while trying.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, req: &Parts) -> Result<Option<UserInfo>>;

    /// Primes caches (config files, CA bundles) so that requests are served
    /// from warm state. Errors propagate to the caller.
    async fn run_once(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapts a closure into an [`Authenticator`].
pub struct AuthenticatorFn<F>(pub F);

#[async_trait::async_trait]
impl<F> Authenticator for AuthenticatorFn<F>
where
    F: Fn(&Parts) -> Result<Option<UserInfo>> + Send + Sync,
{
    async fn authenticate(&self, req: &Parts) -> Result<Option<UserInfo>> {
        (self.0)(req)
    }
}

/// Tries child authenticators in order; the first resolved identity wins.
///
/// A failing child does not stop the scan, but its error is remembered: if no
/// child ends up authenticating the request, the last error is surfaced so
/// callers can tell "nobody recognized this" apart from "something broke".
pub struct UnionAuthenticator {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl UnionAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }
}

#[async_trait::async_trait]
impl Authenticator for UnionAuthenticator {
    async fn authenticate(&self, req: &Parts) -> Result<Option<UserInfo>> {
        let mut last_err = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(req).await {
                Ok(Some(user)) => return Ok(Some(with_authenticated_group(user))),
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(%error, "authenticator failed, trying the next one");
                    last_err = Some(error);
                }
            }
        }
        match last_err {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    async fn run_once(&self) -> Result<()> {
        for authenticator in &self.authenticators {
            authenticator.run_once().await?;
        }
        Ok(())
    }
}

fn with_authenticated_group(mut user: UserInfo) -> UserInfo {
    if !user.groups.iter().any(|g| g == AUTHENTICATED_GROUP) {
        user.groups.push(AUTHENTICATED_GROUP.to_string());
    }
    user
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn parts() -> Parts {
        let (parts, _) = http::Request::builder().uri("/").body(()).unwrap().into_parts();
        parts
    }

    fn fixed(user: Option<UserInfo>) -> Arc<dyn Authenticator> {
        Arc::new(AuthenticatorFn(move |_: &Parts| -> Result<Option<UserInfo>> {
            Ok(user.clone())
        }))
    }

    fn failing(message: &'static str) -> Arc<dyn Authenticator> {
        Arc::new(AuthenticatorFn(move |_: &Parts| -> Result<Option<UserInfo>> {
            Err(anyhow!(message))
        }))
    }

    #[tokio::test]
    async fn first_authenticated_child_wins() {
        let union = UnionAuthenticator::new(vec![
            fixed(None),
            fixed(Some(UserInfo::new("alice"))),
            fixed(Some(UserInfo::new("bob"))),
        ]);
        let user = union.authenticate(&parts()).await.unwrap().unwrap();
        assert_eq!(user.name, "alice");
    }

    #[tokio::test]
    async fn child_errors_do_not_mask_a_later_success() {
        let union = UnionAuthenticator::new(vec![
            failing("webhook unreachable"),
            fixed(Some(UserInfo::new("alice"))),
        ]);
        let user = union.authenticate(&parts()).await.unwrap().unwrap();
        assert_eq!(user.name, "alice");
    }

    #[tokio::test]
    async fn last_error_surfaces_when_nobody_authenticates() {
        let union = UnionAuthenticator::new(vec![
            failing("first failure"),
            failing("second failure"),
            fixed(None),
        ]);
        let err = union.authenticate(&parts()).await.unwrap_err();
        assert_eq!(err.to_string(), "second failure");
    }

    #[tokio::test]
    async fn anonymous_when_no_child_recognizes_the_request() {
        let union = UnionAuthenticator::new(vec![fixed(None), fixed(None)]);
        assert!(union.authenticate(&parts()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identities_always_carry_the_authenticated_group() {
        let union = UnionAuthenticator::new(vec![fixed(Some(UserInfo::with_groups(
            "alice",
            ["my-group"],
        )))]);
        let user = union.authenticate(&parts()).await.unwrap().unwrap();
        assert_eq!(user.groups, vec!["my-group", AUTHENTICATED_GROUP]);

        // Already-present groups are not duplicated.
        let union = UnionAuthenticator::new(vec![fixed(Some(UserInfo::with_groups(
            "alice",
            [AUTHENTICATED_GROUP],
        )))]);
        let user = union.authenticate(&parts()).await.unwrap().unwrap();
        assert_eq!(user.groups, vec![AUTHENTICATED_GROUP]);
    }
}
