//! Cookie resolution for external tooling.
//!
//! The broker caches authenticated cookies per `(hostname, credential
//! fingerprint)`, serialises logins per fingerprint, optionally merges the
//! user's browser cookie store, and writes Netscape-format cookie files the
//! external downloader can consume.

pub mod broker;
pub mod login;
pub mod netscape;
pub mod source;

pub use broker::{CookieBroker, ResolveRequest};
pub use login::{AuthClient, HttpAuthClient, LoginRequest};
pub use source::{Cookie, CookieSource, NullCookieSource};
