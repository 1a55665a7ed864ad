//! Site login subprotocol for acquiring authenticated cookies.
//!
//! The flow is deliberately dumb: GET the login page with an empty jar,
//! lift a CSRF `_token` out of the HTML if one exists, POST the credential
//! form, and collect whatever cookies the site sets along the way. Response
//! status is ignored because many sites set the auth cookie on a 302.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::redirect::Policy;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

use super::source::Cookie;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and endpoint for a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub login_url: String,
}

/// Performs the login subprotocol; swapped out in tests.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Attempt a login and return the cookies the site set.
    ///
    /// Network failures are login failures; the broker logs and proceeds
    /// without auth cookies, and never caches a failure.
    async fn login(&self, cancel: &CancellationToken, request: &LoginRequest)
    -> Result<Vec<Cookie>>;
}

/// Reqwest-backed [`AuthClient`].
///
/// Redirects are not followed so the `Set-Cookie` headers of intermediate
/// 302 responses are observable.
pub struct HttpAuthClient {
    client: reqwest::Client,
    token_patterns: Vec<Regex>,
}

impl HttpAuthClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(LOGIN_TIMEOUT)
            .build()?;

        // `value` may precede or follow `name` in the input tag.
        let token_patterns = vec![
            Regex::new(r#"name=["']_token["'][^>]*value=["']([^"']*)["']"#)
                .expect("static regex"),
            Regex::new(r#"value=["']([^"']*)["'][^>]*name=["']_token["']"#)
                .expect("static regex"),
        ];

        Ok(Self {
            client,
            token_patterns,
        })
    }

    fn extract_token(&self, html: &str) -> Option<String> {
        self.token_patterns
            .iter()
            .find_map(|pattern| pattern.captures(html))
            .map(|captures| captures[1].to_string())
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(
        &self,
        cancel: &CancellationToken,
        request: &LoginRequest,
    ) -> Result<Vec<Cookie>> {
        debug!(hostname = %request.hostname, "Attempting site login");

        let get_response = tokio::select! {
            response = self.client.get(&request.login_url).send() => response?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let mut cookies = collect_cookies(get_response.headers(), &request.hostname);
        let body = get_response.text().await.unwrap_or_default();
        let token = self.extract_token(&body);
        if token.is_none() {
            debug!(hostname = %request.hostname, "Login page carries no _token input");
        }

        let mut form = vec![
            ("email".to_string(), request.username.clone()),
            ("username".to_string(), request.username.clone()),
            ("password".to_string(), request.password.clone()),
        ];
        if let Some(token) = token {
            form.push(("_token".to_string(), token));
        }

        let mut post = self.client.post(&request.login_url).form(&form);
        if !cookies.is_empty() {
            post = post.header(COOKIE, cookie_header(&cookies));
        }

        let post_response = tokio::select! {
            response = post.send() => response?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if !post_response.status().is_success() && !post_response.status().is_redirection() {
            warn!(
                hostname = %request.hostname,
                status = %post_response.status(),
                "Login POST returned an unexpected status; keeping any cookies it set"
            );
        }

        // POST cookies override GET cookies on the same identity.
        for cookie in collect_cookies(post_response.headers(), &request.hostname) {
            cookies.retain(|existing| existing.key() != cookie.key());
            cookies.push(cookie);
        }

        debug!(
            hostname = %request.hostname,
            count = cookies.len(),
            "Login finished"
        );
        Ok(cookies)
    }
}

fn collect_cookies(headers: &reqwest::header::HeaderMap, default_domain: &str) -> Vec<Cookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|header| parse_set_cookie(header, default_domain))
        .collect()
}

fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a `Set-Cookie` header into a [`Cookie`].
///
/// Unknown attributes are ignored; a missing `Domain` attribute falls back
/// to the request hostname.
pub fn parse_set_cookie(header: &str, default_domain: &str) -> Option<Cookie> {
    let mut parts = header.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(default_domain, name, value.trim());
    for part in parts {
        let part = part.trim();
        let (attr, attr_value) = match part.split_once('=') {
            Some((a, v)) => (a.trim(), v.trim()),
            None => (part, ""),
        };
        match attr.to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = attr_value.trim_start_matches('.');
                cookie.domain = format!(".{domain}");
                cookie.include_subdomains = true;
            }
            "path" if !attr_value.is_empty() => cookie.path = attr_value.to_string(),
            "secure" => cookie.secure = true,
            "max-age" => {
                if let Ok(secs) = attr_value.parse::<i64>() {
                    cookie.expires = Utc::now().timestamp() + secs;
                }
            }
            "expires" => {
                if cookie.expires == 0
                    && let Ok(at) = chrono::DateTime::parse_from_rfc2822(attr_value)
                {
                    cookie.expires = at.timestamp();
                }
            }
            _ => {}
        }
    }
    Some(cookie)
}
