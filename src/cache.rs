//! HTTP caching headers.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, EXPIRES};
use http::{HeaderMap, HeaderValue};

/// Who may cache a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    /// Identical for every user; shared proxies may cache it.
    Public,
    /// Per-user; only the user's own browser may cache it.
    Private,
}

impl Cacheability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cacheability::Public => "public",
            Cacheability::Private => "private",
        }
    }
}

/// Mark a response cacheable until `expires_at`.
///
/// Sets both `Cache-Control: max-age` and the older `Expires` header.
/// An `expires_at` in the past yields `max-age=0`.
pub fn cache_until(
    headers: &mut HeaderMap,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    cacheability: Cacheability,
) {
    let max_age = expires_at.signed_duration_since(now).num_seconds().max(0);
    let cache_control = format!("{}, max-age={max_age}", cacheability.as_str());
    let expires = httpdate::fmt_http_date(SystemTime::from(expires_at));

    // Both values are plain ASCII built above.
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&expires) {
        headers.insert(EXPIRES, value);
    }
}
