//! Cookie broker: resolve, authenticate, cache, and serialise cookies.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::domain::ChannelAuth;
use crate::utils::filename::sanitize_title;

use super::login::{AuthClient, LoginRequest};
use super::netscape::write_cookie_file;
use super::source::{Cookie, CookieSource};

/// Cookie name prefixes that identify short-lived browser state not worth
/// handing to external tooling.
const EPHEMERAL_PREFIXES: &[&str] = &["st-", "cst-", "temp-"];

/// One cookie-resolution request for a channel URL.
#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub channel_name: &'a str,
    pub url: &'a str,
    pub hostname: &'a str,
    pub auth: Option<&'a ChannelAuth>,
    pub use_global_cookies: bool,
}

/// Resolves the cookie set to present to external tooling.
///
/// Auth cookies are cached in memory per `(hostname, credential
/// fingerprint)`; logins for the same fingerprint are serialised through a
/// per-fingerprint mutex so concurrent resolutions perform at most one
/// login. The merged cookie file is written fresh on every call to support
/// rotating credentials.
pub struct CookieBroker {
    auth_client: Arc<dyn AuthClient>,
    browser_source: Arc<dyn CookieSource>,
    cookie_dir: PathBuf,
    cache: DashMap<(String, String), Arc<Vec<Cookie>>>,
    login_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CookieBroker {
    pub fn new(
        auth_client: Arc<dyn AuthClient>,
        browser_source: Arc<dyn CookieSource>,
        cookie_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            auth_client,
            browser_source,
            cookie_dir: cookie_dir.into(),
            cache: DashMap::new(),
            login_locks: DashMap::new(),
        }
    }

    /// Drop all cached auth cookies; used on explicit reset and in tests.
    pub fn reset(&self) {
        self.cache.clear();
    }

    /// Resolve cookies for a channel URL and write them to a Netscape file.
    ///
    /// Returns `None` when no cookies apply (no credentials, no browser
    /// cookies) so callers can skip the `--cookies` argument entirely.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        request: &ResolveRequest<'_>,
    ) -> Result<Option<PathBuf>> {
        let fp = credential_fingerprint(request.hostname, request.auth);
        let auth_cookies = self.auth_cookies(cancel, request, &fp).await;

        let browser_cookies = if request.use_global_cookies {
            self.browser_cookies(cancel, request.hostname).await
        } else {
            Vec::new()
        };

        // Auth cookies override browser cookies on (domain, path, name).
        let mut merged: Vec<Cookie> = browser_cookies;
        for cookie in auth_cookies.iter() {
            merged.retain(|existing| existing.key() != cookie.key());
            merged.push(cookie.clone());
        }

        if merged.is_empty() {
            return Ok(None);
        }

        let path = self.cookie_file_path(request.channel_name, request.url);
        write_cookie_file(&path, &merged).await?;
        debug!(
            hostname = request.hostname,
            path = %path.display(),
            cookies = merged.len(),
            "Cookie file written"
        );
        Ok(Some(path))
    }

    /// Cached auth cookies, logging in when credentials exist but the cache
    /// is cold. Login failures resolve to no auth cookies and are not
    /// cached.
    async fn auth_cookies(
        &self,
        cancel: &CancellationToken,
        request: &ResolveRequest<'_>,
        fp: &str,
    ) -> Arc<Vec<Cookie>> {
        let cache_key = (request.hostname.to_string(), fp.to_string());
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!(hostname = request.hostname, "Cookie cache hit");
            return cached.clone();
        }

        let Some(auth) = request.auth else {
            return Arc::new(Vec::new());
        };

        let lock = self
            .login_locks
            .entry(fp.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another resolution may have logged in while we waited.
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached.clone();
        }

        let login_request = LoginRequest {
            hostname: request.hostname.to_string(),
            username: auth.username.clone(),
            password: auth.password.clone(),
            login_url: auth.login_url.clone(),
        };
        match self.auth_client.login(cancel, &login_request).await {
            Ok(cookies) => {
                let cookies = Arc::new(cookies);
                self.cache.insert(cache_key, cookies.clone());
                cookies
            }
            Err(e) => {
                warn!(
                    hostname = request.hostname,
                    error = %e,
                    "Login failed; continuing without auth cookies"
                );
                Arc::new(Vec::new())
            }
        }
    }

    /// Browser cookies for `host` and `.host`, with ephemeral names dropped.
    async fn browser_cookies(&self, cancel: &CancellationToken, hostname: &str) -> Vec<Cookie> {
        let mut cookies = Vec::new();
        for host in [hostname.to_string(), format!(".{hostname}")] {
            match self
                .browser_source
                .read_cookies_for_host(cancel, &host)
                .await
            {
                Ok(found) => cookies.extend(found),
                Err(e) => {
                    debug!(host, error = %e, "Skipping unreadable browser cookie store");
                }
            }
        }
        cookies.retain(|cookie| !is_ephemeral(&cookie.name));
        cookies
    }

    fn cookie_file_path(&self, channel_name: &str, url: &str) -> PathBuf {
        let channel = sanitize_title(channel_name);
        let url_hash = hex::encode(Sha256::digest(url.as_bytes()));
        self.cookie_dir
            .join(format!("{channel}_{}.txt", &url_hash[..8]))
    }
}

/// Hash over `(hostname, username, login_url)`; anonymous requests collapse
/// to `(hostname, "", "")`.
pub fn credential_fingerprint(hostname: &str, auth: Option<&ChannelAuth>) -> String {
    let (username, login_url) = match auth {
        Some(auth) => (auth.username.as_str(), auth.login_url.as_str()),
        None => ("", ""),
    };

    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update([0x1f]);
    hasher.update(username.as_bytes());
    hasher.update([0x1f]);
    hasher.update(login_url.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_ephemeral(name: &str) -> bool {
    let lower = name.to_lowercase();
    EPHEMERAL_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}
