//! Content-Security-Policy merging.
//!
//! Policies are merged directive by directive: a source already listed
//! under a directive is not repeated, new sources are appended in the
//! order they are seen, and directive order follows first appearance.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use http::header::CONTENT_SECURITY_POLICY;
use http::{HeaderMap, HeaderValue};
use url::Url;

use crate::config::CspConfig;
use crate::errors::{Result, SealError};

/// A parsed, mergeable Content-Security-Policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: Vec<(String, Vec<String>)>,
}

impl ContentSecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `policy` into this one.  Directives without any source are
    /// ignored.
    pub fn append_policy(&mut self, policy: &str) -> &mut Self {
        for directive in policy.split(';') {
            let mut tokens = directive.split_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let sources: Vec<&str> = tokens.collect();
            if sources.is_empty() {
                continue;
            }
            self.add_sources(name, &sources);
        }
        self
    }

    /// Merge every directive of `other` into this policy.
    pub fn merge(&mut self, other: &ContentSecurityPolicy) -> &mut Self {
        for (name, sources) in &other.directives {
            let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
            self.add_sources(name, &sources);
        }
        self
    }

    /// Sources listed under `directive`, if any.
    pub fn sources(&self, directive: &str) -> Option<&[String]> {
        self.directives
            .iter()
            .find(|(name, _)| name == directive)
            .map(|(_, sources)| sources.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    fn add_sources(&mut self, directive: &str, sources: &[&str]) {
        let pos = match self.directives.iter().position(|(name, _)| name == directive) {
            Some(pos) => pos,
            None => {
                self.directives.push((directive.to_string(), Vec::new()));
                self.directives.len() - 1
            }
        };
        let existing = &mut self.directives[pos].1;
        for source in sources {
            if !existing.iter().any(|s| s == source) {
                existing.push(source.to_string());
            }
        }
    }
}

impl fmt::Display for ContentSecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, sources)) in self.directives.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            f.write_str(name)?;
            for source in sources {
                write!(f, " {source}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ContentSecurityPolicy {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut policy = Self::new();
        policy.append_policy(s);
        Ok(policy)
    }
}

/// Accumulates a policy starting from what a response already carries,
/// then writes it back as a single header.
#[derive(Debug, Clone, Default)]
pub struct ContentSecurityPolicyHeaders {
    policy: ContentSecurityPolicy,
}

impl ContentSecurityPolicyHeaders {
    /// Start from every `Content-Security-Policy` header in `response`.
    pub fn from_headers(response: &HeaderMap) -> Self {
        let mut policy = ContentSecurityPolicy::new();
        for value in response.get_all(CONTENT_SECURITY_POLICY) {
            if let Ok(value) = value.to_str() {
                policy.append_policy(value);
            }
        }
        Self { policy }
    }

    pub fn append_policy(&mut self, policy: &str) -> &mut Self {
        self.policy.append_policy(policy);
        self
    }

    pub fn merge_policy(&mut self, policy: &ContentSecurityPolicy) -> &mut Self {
        self.policy.merge(policy);
        self
    }

    /// Discard the accumulated policy in favour of `policy`.
    pub fn replace_policy(&mut self, policy: ContentSecurityPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ContentSecurityPolicy {
        &self.policy
    }

    /// Replace all `Content-Security-Policy` headers in `response` with
    /// the accumulated policy.
    pub fn update_headers(&self, response: &mut HeaderMap) -> Result<()> {
        let rendered = self.policy.to_string();
        let value = HeaderValue::from_str(&rendered).map_err(|e| {
            SealError::invalid_argument(format!("invalid Content-Security-Policy '{rendered}': {e}"))
        })?;
        response.insert(CONTENT_SECURITY_POLICY, value);
        Ok(())
    }
}

/// Decides whether a policy applies to a URL, by excluded path prefix.
#[derive(Debug, Clone, Default)]
pub struct CspUrlFilter {
    excluded_paths: Vec<String>,
}

impl CspUrlFilter {
    pub fn new<I, S>(excluded_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_paths: excluded_paths
                .into_iter()
                .map(|p| p.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &CspConfig) -> Self {
        Self::new(config.excluded_paths.iter().cloned())
    }

    /// `false` if the URL's path starts with an excluded path
    /// (case-insensitive).
    pub fn applies_to(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        !self
            .excluded_paths
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
    }
}

/// Merge the configured policy into `response` unless `url` is excluded.
///
/// Returns `true` when the headers were touched.
pub fn apply_csp_config(url: &Url, response: &mut HeaderMap, config: &CspConfig) -> Result<bool> {
    if config.policy.trim().is_empty() || !CspUrlFilter::from_config(config).applies_to(url) {
        return Ok(false);
    }
    ContentSecurityPolicyHeaders::from_headers(response)
        .append_policy(&config.policy)
        .update_headers(response)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_csp_config() {
        let config = CspConfig {
            policy: "img-src 'self'".to_string(),
            excluded_paths: vec!["/raw/".to_string()],
        };
        let mut response = HeaderMap::new();
        response.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static("img-src data:"));

        let page = Url::parse("https://example.org/page").unwrap();
        assert!(apply_csp_config(&page, &mut response, &config).unwrap());
        assert_eq!(response[CONTENT_SECURITY_POLICY], "img-src data: 'self'");

        let raw = Url::parse("https://example.org/raw/file").unwrap();
        let mut untouched = HeaderMap::new();
        assert!(!apply_csp_config(&raw, &mut untouched, &config).unwrap());
        assert!(untouched.is_empty());
    }

    #[test]
    fn test_amended_update_ignores_duplicates() {
        let mut policy: ContentSecurityPolicy =
            "img-src: https://www.example.org https://www.w3.org".parse().unwrap();
        policy.append_policy("img-src: https://www.example.org https://example.org");
        assert_eq!(
            policy.to_string(),
            "img-src: https://www.example.org https://www.w3.org https://example.org"
        );
    }

    #[test]
    fn test_directive_order_follows_first_appearance() {
        let mut policy = ContentSecurityPolicy::new();
        policy
            .append_policy("script-src 'self'; img-src 'self'")
            .append_policy("img-src data:; default-src 'none'");
        assert_eq!(
            policy.to_string(),
            "script-src 'self';img-src 'self' data:;default-src 'none'"
        );
        assert_eq!(
            policy.sources("img-src").unwrap().to_vec(),
            vec!["'self'".to_string(), "data:".to_string()]
        );
    }

    #[test]
    fn test_sourceless_directives_are_ignored() {
        let policy: ContentSecurityPolicy =
            "upgrade-insecure-requests; ;  img-src 'self' ".parse().unwrap();
        assert_eq!(policy.to_string(), "img-src 'self'");
        assert!(policy.sources("upgrade-insecure-requests").is_none());
    }

    #[test]
    fn test_merge() {
        let mut a: ContentSecurityPolicy = "img-src a".parse().unwrap();
        let b: ContentSecurityPolicy = "img-src a b;font-src c".parse().unwrap();
        a.merge(&b);
        assert_eq!(a.to_string(), "img-src a b;font-src c");
    }

    #[test]
    fn test_existing_header_is_updated() {
        let mut response = HeaderMap::new();
        response.insert(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("img-src: https://www.example.org"),
        );
        ContentSecurityPolicyHeaders::from_headers(&response)
            .append_policy("img-src: https://example.org")
            .update_headers(&mut response)
            .unwrap();
        assert_eq!(
            response[CONTENT_SECURITY_POLICY],
            "img-src: https://www.example.org https://example.org"
        );
    }

    #[test]
    fn test_multiple_headers_collapse_to_one() {
        let mut response = HeaderMap::new();
        response.append(CONTENT_SECURITY_POLICY, HeaderValue::from_static("img-src a"));
        response.append(CONTENT_SECURITY_POLICY, HeaderValue::from_static("script-src b"));
        ContentSecurityPolicyHeaders::from_headers(&response)
            .update_headers(&mut response)
            .unwrap();
        assert_eq!(response.get_all(CONTENT_SECURITY_POLICY).iter().count(), 1);
        assert_eq!(response[CONTENT_SECURITY_POLICY], "img-src a;script-src b");
    }

    #[test]
    fn test_replace_policy() {
        let mut response = HeaderMap::new();
        response.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static("img-src a"));
        let replacement: ContentSecurityPolicy = "default-src 'self'".parse().unwrap();
        ContentSecurityPolicyHeaders::from_headers(&response)
            .replace_policy(replacement)
            .update_headers(&mut response)
            .unwrap();
        assert_eq!(response[CONTENT_SECURITY_POLICY], "default-src 'self'");
    }

    #[test]
    fn test_invalid_header_value_is_error() {
        let mut headers = ContentSecurityPolicyHeaders::default();
        headers.append_policy("img-src bad\u{7f}value");
        let err = headers.update_headers(&mut HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn test_url_is_included() {
        let filter = CspUrlFilter::new(["/example/excluded.html"]);
        let url = Url::parse("https://www.example.org/example/included.html").unwrap();
        assert!(filter.applies_to(&url));
    }

    #[test]
    fn test_url_is_excluded() {
        let filter = CspUrlFilter::new(["/example/excluded.html"]);
        let url = Url::parse("https://www.example.org/example/excluded.html").unwrap();
        assert!(!filter.applies_to(&url));
    }

    #[test]
    fn test_url_exclusion_is_case_insensitive_prefix() {
        let filter = CspUrlFilter::from_config(&CspConfig {
            policy: String::new(),
            excluded_paths: vec!["/Legacy/".to_string()],
        });
        let url = Url::parse("https://www.example.org/legacy/page?x=1").unwrap();
        assert!(!filter.applies_to(&url));
        assert!(CspUrlFilter::default().applies_to(&url));
    }
}
