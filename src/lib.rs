//! urlseal: tamper-evident, self-expiring URLs.
//!
//! A protected URL carries a keyed hash over its canonical query string
//! (`h`) and, optionally, its issue time (`t`), so that whoever holds the
//! salt can later tell whether the URL was minted by them, whether it was
//! altered, and whether it has aged out:
//!
//! ```text
//! https://example.org/confirm?id=1&t=20160101000000&h=Qm9n...
//! ```
//!
//! Verification is stateless; nothing is stored at issue time.  The
//! crate also carries a few stateless response-header helpers (CORS
//! origin echo, Content-Security-Policy merging, cache headers).

pub mod cache;
pub mod config;
pub mod cors;
pub mod csp;
pub mod errors;
pub mod expiry;
pub mod metrics;
pub mod query;
pub mod signer;

pub use config::{Config, Salt};
pub use errors::{Result, SealError};
pub use expiry::{LinkStatus, UrlExpirer};
pub use query::{parse_query, serialize_query, QueryMap};
pub use signer::{DigestScheme, UrlProtector, UrlSigner};
