//! URL helpers for host extraction and dedup normalization.

use url::Url;

/// Extract the hostname from an absolute http(s) URL.
///
/// Returns `None` for non-http(s) schemes, relative paths, and URLs without
/// a host component.
pub fn extract_host(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    match parsed.scheme() {
        "http" | "https" => parsed.host_str().map(str::to_string),
        _ => None,
    }
}

/// Normalize a URL for deduplication: drop the scheme, drop a leading
/// `www.`, and trim trailing slashes.
///
/// Two URLs identifying the same video on the same host normalize to the
/// same string even when one was stored with `http://` and the other
/// discovered as `https://.../`.
pub fn normalize_for_dedup(raw: &str) -> String {
    let without_scheme = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

/// Whether two URLs refer to the same resource under dedup rules.
pub fn same_resource(a: &str, b: &str) -> bool {
    a == b || normalize_for_dedup(a) == normalize_for_dedup(b)
}
