use base64::prelude::{Engine as _, BASE64_STANDARD};
use reqwest::header::{HeaderMap, HeaderValue};
use std::fmt::Debug;

use crate::error::QuartzError;

/// Trait for stamping authorization onto outgoing requests.
///
/// The driver core treats authorization as an opaque contract: before a
/// request is posted, the provider is asked to add whatever headers the
/// target service requires. Providers must be internally thread-safe;
/// the same instance is used concurrently by every in-flight request.
///
/// Signature calculation and credential file loading live outside the
/// core; applications with such needs implement this trait themselves.
pub trait AuthorizationProvider: Send + Sync + Debug + AuthorizationProviderClone {
    /// Add the required authorization headers to an outgoing request.
    fn stamp(&self, headers: &mut HeaderMap) -> Result<(), QuartzError>;

    /// Force a refresh of any cached credentials, typically after the
    /// server rejected a request as auth-invalid. Returns true if the
    /// provider refreshed anything; if so, the request is retried once.
    fn refresh(&self) -> Result<bool, QuartzError> {
        Ok(false)
    }
}

// This allows users of this library to clone a Box<dyn AuthorizationProvider>
pub trait AuthorizationProviderClone {
    fn clone_box(&self) -> Box<dyn AuthorizationProvider>;
}

impl<T> AuthorizationProviderClone for T
where
    T: 'static + AuthorizationProvider + Clone,
{
    fn clone_box(&self) -> Box<dyn AuthorizationProvider> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn AuthorizationProvider> {
    fn clone(&self) -> Box<dyn AuthorizationProvider> {
        self.clone_box()
    }
}

/// Provider that adds no authorization at all. Suitable for non-secure
/// on-premise stores.
#[derive(Debug, Clone, Default)]
pub struct NoAuthProvider {}

impl AuthorizationProvider for NoAuthProvider {
    fn stamp(&self, _headers: &mut HeaderMap) -> Result<(), QuartzError> {
        Ok(())
    }
}

/// Provider that presents a fixed bearer token.
///
/// The cloud simulator accepts any token; secure deployments supply a
/// real one obtained out of band.
#[derive(Debug, Clone)]
pub struct BearerTokenProvider {
    token: String,
}

impl BearerTokenProvider {
    pub fn new(token: &str) -> BearerTokenProvider {
        BearerTokenProvider {
            token: token.to_string(),
        }
    }
}

impl AuthorizationProvider for BearerTokenProvider {
    fn stamp(&self, headers: &mut HeaderMap) -> Result<(), QuartzError> {
        let v = format!("Bearer {}", self.token);
        headers.insert("Authorization", HeaderValue::from_str(&v)?);
        Ok(())
    }
}

/// Provider for secure on-premise stores using basic user/password
/// authentication against the proxy.
#[derive(Clone)]
pub struct StoreCredentialsProvider {
    user: String,
    password: String,
}

impl StoreCredentialsProvider {
    pub fn new(user: &str, password: &str) -> StoreCredentialsProvider {
        StoreCredentialsProvider {
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

// manual Debug so the password never lands in logs
impl Debug for StoreCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreCredentialsProvider(user={})", self.user)
    }
}

impl AuthorizationProvider for StoreCredentialsProvider {
    fn stamp(&self, headers: &mut HeaderMap) -> Result<(), QuartzError> {
        let creds = format!("{}:{}", self.user, self.password);
        let v = format!("Basic {}", BASE64_STANDARD.encode(creds));
        headers.insert("Authorization", HeaderValue::from_str(&v)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_stamp() {
        let p = BearerTokenProvider::new("quartz");
        let mut h = HeaderMap::new();
        p.stamp(&mut h).unwrap();
        assert_eq!(h.get("Authorization").unwrap(), "Bearer quartz");
    }

    #[test]
    fn test_store_credentials_debug_hides_password() {
        let p = StoreCredentialsProvider::new("admin", "hunter2");
        let s = format!("{:?}", p);
        assert!(!s.contains("hunter2"));
    }
}
