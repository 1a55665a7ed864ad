//! Netscape cookie-file serialization.
//!
//! The external downloader consumes the classic seven-field tab-separated
//! format: domain, subdomain flag, path, secure flag, expiry, name, value.

use std::fmt::Write as _;
use std::path::Path;

use crate::Result;

use super::source::Cookie;

const HEADER: &str = "# Netscape HTTP Cookie File\n";

/// Render cookies in Netscape format.
pub fn to_netscape(cookies: &[Cookie]) -> String {
    let mut out = String::with_capacity(HEADER.len() + cookies.len() * 64);
    out.push_str(HEADER);
    for cookie in cookies {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            cookie.domain,
            flag(cookie.include_subdomains),
            cookie.path,
            flag(cookie.secure),
            cookie.expires,
            cookie.name,
            cookie.value,
        );
    }
    out
}

/// Write a cookie file, creating parent directories as needed.
pub async fn write_cookie_file(path: &Path, cookies: &[Cookie]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, to_netscape(cookies)).await?;
    Ok(())
}

fn flag(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}
