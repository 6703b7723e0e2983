//! Keyed-hash URL protection.
//!
//! [`UrlSigner::protect`] appends a hash parameter computed over the
//! canonical query string; [`UrlSigner::verify`] recomputes it.
//!
//! ```text
//! canonical = serialize(parse(query) - hash_parameter)
//! digest    = HMAC-SHA256(salt, canonical)            (hmac-sha256)
//!           | SHA1(salt + canonical + salt)           (legacy-sha1)
//! hash      = base64(digest) with [^A-Za-z0-9] removed
//! ```
//!
//! The canonical form keeps parameters in the order they appear, so a
//! reordered query does not verify.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use metrics::counter;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;
use url::Url;

use crate::config::{Salt, SignerConfig};
use crate::errors::Result;
use crate::metrics::{PROTECT_TOTAL, VERIFY_TOTAL};
use crate::query::{ensure_canonical, parse_absolute_url, validate_parameter_name, QueryMap};

type HmacSha256 = Hmac<Sha256>;

/// Default name of the hash parameter.
pub const DEFAULT_HASH_PARAMETER: &str = "h";

/// How the digest is computed from the salt and canonical query.
///
/// The two schemes produce unrelated hashes.  Links minted by a system that
/// hashed `salt + query + salt` with SHA-1 only verify under
/// [`DigestScheme::LegacySha1`]; switch a signer to it with
/// [`UrlSigner::with_scheme`] when those links must keep working.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestScheme {
    /// HMAC-SHA256 keyed with the salt.
    #[default]
    HmacSha256,
    /// SHA-1 over the canonical query bracketed by the salt.  Only for
    /// checking links minted by systems that used this construction.
    LegacySha1,
}

/// Integrity collaborator: anything that can stamp a URL and later
/// confirm the stamp.
///
/// [`crate::expiry::UrlExpirer`] is generic over this so that expiry
/// policy can be exercised with a stand-in protector.
pub trait UrlProtector: Send + Sync {
    /// Return `url` extended with whatever proof the protector adds.
    fn protect(&self, url: &str) -> Result<Url>;

    /// Check a URL produced by [`UrlProtector::protect`].  Tampering is
    /// `Ok(false)`; only bad arguments are errors.
    fn verify(&self, url: &str) -> Result<bool>;
}

impl<P: UrlProtector + ?Sized> UrlProtector for &P {
    fn protect(&self, url: &str) -> Result<Url> {
        (**self).protect(url)
    }

    fn verify(&self, url: &str) -> Result<bool> {
        (**self).verify(url)
    }
}

impl<P: UrlProtector + ?Sized> UrlProtector for Box<P> {
    fn protect(&self, url: &str) -> Result<Url> {
        (**self).protect(url)
    }

    fn verify(&self, url: &str) -> Result<bool> {
        (**self).verify(url)
    }
}

impl<P: UrlProtector + ?Sized> UrlProtector for Arc<P> {
    fn protect(&self, url: &str) -> Result<Url> {
        (**self).protect(url)
    }

    fn verify(&self, url: &str) -> Result<bool> {
        (**self).verify(url)
    }
}

/// Signs and verifies query strings with a shared salt.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    salt: Salt,
    hash_parameter: String,
    scheme: DigestScheme,
}

impl UrlSigner {
    /// Create a signer with the default hash parameter (`h`) and the
    /// default scheme, [`DigestScheme::HmacSha256`].
    ///
    /// Links minted with the salt-wrapped SHA-1 construction will not
    /// verify against this signer until it is given
    /// `with_scheme(DigestScheme::LegacySha1)`.
    ///
    /// Fails with `InvalidState` if `salt` is empty.
    pub fn new(salt: impl Into<String>) -> Result<Self> {
        Ok(Self {
            salt: Salt::new(salt)?,
            hash_parameter: DEFAULT_HASH_PARAMETER.to_string(),
            scheme: DigestScheme::default(),
        })
    }

    /// Build a signer from configuration.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        Self::new(config.salt.expose())?
            .with_hash_parameter(&config.hash_parameter)
            .map(|signer| signer.with_scheme(config.scheme))
    }

    /// Use `name` instead of `h` for the hash parameter.
    pub fn with_hash_parameter(mut self, name: &str) -> Result<Self> {
        validate_parameter_name(name)?;
        self.hash_parameter = name.to_string();
        Ok(self)
    }

    pub fn with_scheme(mut self, scheme: DigestScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn hash_parameter(&self) -> &str {
        &self.hash_parameter
    }

    pub fn scheme(&self) -> DigestScheme {
        self.scheme
    }

    /// Compute the URL-safe hash for a canonical query string.
    pub fn compute_hash(&self, canonical_query: &str) -> String {
        let digest = match self.scheme {
            DigestScheme::HmacSha256 => {
                hmac_sha256(self.salt.expose().as_bytes(), canonical_query.as_bytes())
            }
            DigestScheme::LegacySha1 => {
                let mut hasher = Sha1::new();
                hasher.update(self.salt.expose().as_bytes());
                hasher.update(canonical_query.as_bytes());
                hasher.update(self.salt.expose().as_bytes());
                hasher.finalize().to_vec()
            }
        };
        url_safe_encode(&digest)
    }

    /// Return a copy of `url` with the hash appended as the last parameter.
    ///
    /// A hash parameter already present is dropped, so protecting a
    /// protected URL re-signs it.  Fails with `InvalidArgument` if the query
    /// holds valueless segments or repeated names, which the canonical form
    /// could not carry without changing the URL.
    pub fn protect(&self, url: &str) -> Result<Url> {
        let mut url = parse_absolute_url(url)?;
        let raw = url.query().unwrap_or_default();
        ensure_canonical(raw, &[self.hash_parameter.as_str()])?;
        let mut query = QueryMap::parse(raw);
        query.remove(&self.hash_parameter);

        let canonical = query.serialize(&[]);
        let hash = self.compute_hash(&canonical);
        url.set_query(Some(&join_protected(&canonical, &self.hash_parameter, &hash)));

        counter!(PROTECT_TOTAL).increment(1);
        Ok(url)
    }

    /// Check that `url` carries a hash matching its other parameters.
    ///
    /// Besides the digest itself, the raw query must be exactly the
    /// canonical protected form: segments that parsing would drop or fold
    /// (valueless names, repeated names) and anything after the hash make
    /// the URL invalid.
    pub fn verify(&self, url: &str) -> Result<bool> {
        let url = parse_absolute_url(url)?;
        let raw = url.query().unwrap_or_default();
        let query = QueryMap::parse(raw);

        let received = match query.get(&self.hash_parameter) {
            Some(hash) if !hash.is_empty() => hash,
            _ => return Ok(rejected("missing hash parameter")),
        };

        let canonical = query.serialize(&[self.hash_parameter.as_str()]);
        let expected = self.compute_hash(&canonical);
        if !constant_time_eq(&expected, received) {
            return Ok(rejected("hash mismatch"));
        }

        if raw != join_protected(&canonical, &self.hash_parameter, received) {
            return Ok(rejected("query is not in canonical protected form"));
        }

        counter!(VERIFY_TOTAL, "outcome" => "valid").increment(1);
        Ok(true)
    }
}

impl UrlProtector for UrlSigner {
    fn protect(&self, url: &str) -> Result<Url> {
        UrlSigner::protect(self, url)
    }

    fn verify(&self, url: &str) -> Result<bool> {
        UrlSigner::verify(self, url)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Record a failed verification and return `false`.
fn rejected(reason: &'static str) -> bool {
    debug!(reason, "url verification failed");
    counter!(VERIFY_TOTAL, "outcome" => "invalid").increment(1);
    false
}

/// `canonical&name=hash`, or just `name=hash` for an empty query.
fn join_protected(canonical: &str, name: &str, hash: &str) -> String {
    if canonical.is_empty() {
        format!("{name}={hash}")
    } else {
        format!("{canonical}&{name}={hash}")
    }
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Base64-encode and keep only `[A-Za-z0-9]`, so the value never needs
/// percent-encoding.
fn url_safe_encode(digest: &[u8]) -> String {
    STANDARD
        .encode(digest)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Compare two hash strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
