//! Cookie type and the browser cookie-store contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// One HTTP cookie, shaped for Netscape-format serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix expiry in seconds; `0` marks a session cookie.
    pub expires: i64,
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            include_subdomains: false,
            path: "/".to_string(),
            secure: false,
            expires: 0,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Collision identity for merging: `(domain, path, name)`.
    pub fn key(&self) -> (String, String, String) {
        (
            self.domain.clone(),
            self.path.clone(),
            self.name.clone(),
        )
    }
}

/// Read access to the user's browser cookie stores.
///
/// Implementations enumerate every supported browser store and silently
/// skip stores that cannot be read.
#[async_trait]
pub trait CookieSource: Send + Sync {
    async fn read_cookies_for_host(
        &self,
        cancel: &CancellationToken,
        host: &str,
    ) -> Result<Vec<Cookie>>;
}

/// A source with no browser stores; resolves every host to nothing.
pub struct NullCookieSource;

#[async_trait]
impl CookieSource for NullCookieSource {
    async fn read_cookies_for_host(
        &self,
        _cancel: &CancellationToken,
        _host: &str,
    ) -> Result<Vec<Cookie>> {
        Ok(Vec::new())
    }
}
