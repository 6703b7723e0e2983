//! Cross-origin allowed-origin echo.
//!
//! Only the `Access-Control-Allow-Origin` response header is handled:
//! when the request's `Origin` is on the allow list it is echoed back
//! verbatim, otherwise the header is removed.

use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use http::HeaderMap;
use tracing::debug;

use crate::config::CorsConfig;

/// Set of origins allowed to make cross-origin requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    /// Create a policy from a list of origins such as
    /// `https://example.org` or `http://localhost:*`.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| o.as_ref().trim().to_ascii_lowercase())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(&config.allowed_origins)
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    /// Case-insensitive match; an entry ending in `:*` matches any port.
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        if self.origins.contains(&origin) {
            return true;
        }
        match port_wildcard(&origin) {
            Some(wildcard) => self.origins.contains(&wildcard),
            None => false,
        }
    }
}

/// Replace a trailing `:<digits>` with `:*`.
fn port_wildcard(origin: &str) -> Option<String> {
    let (host, port) = origin.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{host}:*"))
}

/// Echo an allowed `Origin` back as `Access-Control-Allow-Origin`.
///
/// Any existing `Access-Control-Allow-Origin` on `response` is removed
/// first.  Returns `true` when the header was set.
pub fn apply_cors_policy(request: &HeaderMap, response: &mut HeaderMap, policy: &CorsPolicy) -> bool {
    response.remove(ACCESS_CONTROL_ALLOW_ORIGIN);

    let Some(origin) = request.get(ORIGIN) else {
        return false;
    };
    let Ok(origin_str) = origin.to_str() else {
        return false;
    };
    if origin_str.is_empty() || !policy.is_allowed_origin(origin_str) {
        debug!(origin = origin_str, "cross-origin request not allowed");
        return false;
    }

    response.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    true
}
