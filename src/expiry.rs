//! Self-expiring URLs.
//!
//! [`UrlExpirer::expire`] adds an issue timestamp (`t=yyyyMMddHHmmss`,
//! UTC) and then hands the URL to a [`UrlProtector`] so the timestamp is
//! covered by the hash.  [`UrlExpirer::has_expired`] fails closed: a URL
//! that does not verify, or has no readable timestamp, is expired.
//!
//! Clocks are not skew-compensated.  Issuer and verifier are assumed to
//! share a clock or be externally synchronized.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use metrics::counter;
use tracing::debug;
use url::Url;

use crate::config::ExpiryConfig;
use crate::errors::Result;
use crate::metrics::EXPIRY_CHECKS_TOTAL;
use crate::query::{ensure_canonical, parse_absolute_url, validate_parameter_name, QueryMap};
use crate::signer::UrlProtector;

/// Default name of the timestamp parameter.
pub const DEFAULT_TIME_PARAMETER: &str = "t";

/// `chrono` format of the timestamp parameter.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Outcome of an expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Verified and inside its validity window.
    Valid { issued_at: DateTime<Utc> },
    /// Verified but older than the validity window.
    Expired { issued_at: DateTime<Utc> },
    /// The protector rejected the URL.
    Tampered,
    /// Verified, but no timestamp parameter.
    MissingTimestamp,
    /// Verified, but the timestamp is not 14 digits of a real UTC time.
    MalformedTimestamp,
}

impl LinkStatus {
    /// Everything except [`LinkStatus::Valid`] counts as expired.
    pub fn is_expired(&self) -> bool {
        !matches!(self, LinkStatus::Valid { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Valid { .. } => "valid",
            LinkStatus::Expired { .. } => "expired",
            LinkStatus::Tampered => "tampered",
            LinkStatus::MissingTimestamp => "missing_timestamp",
            LinkStatus::MalformedTimestamp => "malformed_timestamp",
        }
    }
}

/// Adds and checks issue timestamps, delegating integrity to `P`.
#[derive(Clone)]
pub struct UrlExpirer<P> {
    protector: P,
    time_parameter: String,
}

impl<P: UrlProtector> UrlExpirer<P> {
    /// Create an expirer using the default `t` parameter.
    pub fn new(protector: P) -> Self {
        Self {
            protector,
            time_parameter: DEFAULT_TIME_PARAMETER.to_string(),
        }
    }

    /// Build an expirer from configuration.
    pub fn from_config(protector: P, config: &ExpiryConfig) -> Result<Self> {
        Self::new(protector).with_time_parameter(&config.time_parameter)
    }

    /// Use `name` instead of `t` for the timestamp parameter.
    pub fn with_time_parameter(mut self, name: &str) -> Result<Self> {
        validate_parameter_name(name)?;
        self.time_parameter = name.to_string();
        Ok(self)
    }

    pub fn time_parameter(&self) -> &str {
        &self.time_parameter
    }

    pub fn protector(&self) -> &P {
        &self.protector
    }

    /// Stamp `url` with the current time and protect it.
    pub fn expire(&self, url: &str) -> Result<Url> {
        self.expire_at(url, Utc::now())
    }

    /// Stamp `url` with `issued_at` and protect it.
    ///
    /// An existing timestamp parameter is replaced rather than folded into
    /// a second value.  Queries the protector could not carry unchanged
    /// (valueless segments, repeated names) fail with `InvalidArgument`.
    pub fn expire_at(&self, url: &str, issued_at: DateTime<Utc>) -> Result<Url> {
        let mut stamped = parse_absolute_url(url)?;
        let raw = stamped.query().unwrap_or_default();
        ensure_canonical(raw, &[self.time_parameter.as_str()])?;
        let mut query = QueryMap::parse(raw);
        query.remove(&self.time_parameter);
        query.append(&self.time_parameter, &format_timestamp(issued_at));
        stamped.set_query(Some(&query.serialize(&[])));

        self.protector.protect(stamped.as_str())
    }

    /// Whether `url` is expired now, given a window of `valid_for_seconds`.
    pub fn has_expired(&self, url: &str, valid_for_seconds: u64) -> Result<bool> {
        self.has_expired_at(url, valid_for_seconds, Utc::now())
    }

    /// Whether `url` is expired at `now`.
    ///
    /// A URL checked exactly `valid_for_seconds` after issue is still valid.
    pub fn has_expired_at(
        &self,
        url: &str,
        valid_for_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.check_at(url, valid_for_seconds, now)?.is_expired())
    }

    /// Like [`UrlExpirer::has_expired`], with the reason attached.
    pub fn check(&self, url: &str, valid_for_seconds: u64) -> Result<LinkStatus> {
        self.check_at(url, valid_for_seconds, Utc::now())
    }

    /// Like [`UrlExpirer::has_expired_at`], with the reason attached.
    pub fn check_at(
        &self,
        url: &str,
        valid_for_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<LinkStatus> {
        let parsed = parse_absolute_url(url)?;

        let status = if !self.protector.verify(url)? {
            LinkStatus::Tampered
        } else {
            let query = QueryMap::parse(parsed.query().unwrap_or_default());
            match query.get(&self.time_parameter) {
                None => LinkStatus::MissingTimestamp,
                Some(raw) => match parse_timestamp(raw) {
                    None => LinkStatus::MalformedTimestamp,
                    Some(issued_at) if window_elapsed(issued_at, valid_for_seconds, now) => {
                        LinkStatus::Expired { issued_at }
                    }
                    Some(issued_at) => LinkStatus::Valid { issued_at },
                },
            }
        };

        debug!(status = status.as_str(), valid_for_seconds, "url expiry checked");
        counter!(EXPIRY_CHECKS_TOTAL, "status" => status.as_str()).increment(1);
        Ok(status)
    }

    /// Read the issue time without verifying the URL.  Diagnostic only:
    /// never base an access decision on this.
    pub fn issued_at(&self, url: &str) -> Result<Option<DateTime<Utc>>> {
        let parsed = parse_absolute_url(url)?;
        let query = QueryMap::parse(parsed.query().unwrap_or_default());
        Ok(query.get(&self.time_parameter).and_then(parse_timestamp))
    }
}

// ── Timestamp helpers ───────────────────────────────────────────────

/// Format `time` as `yyyyMMddHHmmss`.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse exactly 14 digits as a UTC `yyyyMMddHHmmss` timestamp.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Strictly more than `valid_for_seconds` between `issued_at` and `now`.
/// Windows too large for `TimeDelta` never elapse.
fn window_elapsed(issued_at: DateTime<Utc>, valid_for_seconds: u64, now: DateTime<Utc>) -> bool {
    let window = match i64::try_from(valid_for_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
    {
        Some(window) => window,
        None => return false,
    };
    now.signed_duration_since(issued_at) > window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::UrlSigner;

    const URL: &str = "https://example.org/protect-me?id=1";
    const ONE_DAY: u64 = 86_400;

    /// Accepts everything and adds nothing.
    struct FakeProtector;

    impl UrlProtector for FakeProtector {
        fn protect(&self, url: &str) -> Result<Url> {
            parse_absolute_url(url)
        }

        fn verify(&self, _url: &str) -> Result<bool> {
            Ok(true)
        }
    }

    /// Rejects everything.
    struct RejectingProtector;

    impl UrlProtector for RejectingProtector {
        fn protect(&self, url: &str) -> Result<Url> {
            parse_absolute_url(url)
        }

        fn verify(&self, _url: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn signed_expirer() -> UrlExpirer<UrlSigner> {
        UrlExpirer::new(UrlSigner::new("abc123").unwrap())
    }

    // ── timestamp helpers ───────────────────────────────────────────

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(at(2016, 1, 1, 0, 0, 0)), "20160101000000");
        assert_eq!(format_timestamp(at(2026, 12, 31, 23, 59, 58)), "20261231235958");
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("20160101000000"), Some(at(2016, 1, 1, 0, 0, 0)));
        assert_eq!(parse_timestamp("2016010100000"), None);
        assert_eq!(parse_timestamp("201601010000000"), None);
        assert_eq!(parse_timestamp("2016010100000a"), None);
        assert_eq!(parse_timestamp("20161301000000"), None);
        assert_eq!(parse_timestamp("+2016010100000"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    // ── with a stand-in protector ───────────────────────────────────

    #[test]
    fn test_valid_url_is_allowed() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let expired = expirer
            .has_expired_at(url.as_str(), ONE_DAY, at(2016, 1, 2, 0, 0, 0))
            .unwrap();
        assert!(!expired);
    }

    #[test]
    fn test_expired_url_is_disallowed() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let expired = expirer
            .has_expired_at(url.as_str(), ONE_DAY, at(2016, 1, 2, 0, 0, 1))
            .unwrap();
        assert!(expired);
    }

    #[test]
    fn test_expire_adds_timestamp_parameter() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(url.query(), Some("id=1&t=20160101000000"));
    }

    #[test]
    fn test_expire_replaces_existing_timestamp() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer
            .expire_at("https://example.org/?t=19990101000000&id=1", at(2016, 1, 1, 0, 0, 0))
            .unwrap();
        assert_eq!(url.query(), Some("id=1&t=20160101000000"));
    }

    #[test]
    fn test_expire_rejects_valueless_flag() {
        let expirer = UrlExpirer::new(FakeProtector);
        let err = expirer
            .expire_at("https://example.org/page?print&id=1", at(2016, 1, 1, 0, 0, 0))
            .unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn test_expire_rejects_repeated_names() {
        let expirer = UrlExpirer::new(FakeProtector);
        let err = expirer
            .expire_at("https://example.org/?a=1&a=2", at(2016, 1, 1, 0, 0, 0))
            .unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn test_failed_verification_is_expired() {
        let expirer = UrlExpirer::new(RejectingProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let status = expirer
            .check_at(url.as_str(), ONE_DAY, at(2016, 1, 1, 0, 0, 0))
            .unwrap();
        assert_eq!(status, LinkStatus::Tampered);
        assert!(status.is_expired());
    }

    #[test]
    fn test_missing_timestamp_is_expired() {
        let expirer = UrlExpirer::new(FakeProtector);
        let status = expirer.check_at(URL, ONE_DAY, at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(status, LinkStatus::MissingTimestamp);
        assert!(expirer.has_expired_at(URL, ONE_DAY, at(2016, 1, 1, 0, 0, 0)).unwrap());
    }

    #[test]
    fn test_malformed_timestamp_is_expired() {
        let expirer = UrlExpirer::new(FakeProtector);
        let status = expirer
            .check_at("https://example.org/?t=yesterday", ONE_DAY, Utc::now())
            .unwrap();
        assert_eq!(status, LinkStatus::MalformedTimestamp);
    }

    #[test]
    fn test_future_timestamp_is_valid() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 2, 0, 0, 0)).unwrap();
        assert!(!expirer
            .has_expired_at(url.as_str(), 60, at(2016, 1, 1, 0, 0, 0))
            .unwrap());
    }

    #[test]
    fn test_huge_window_never_elapses() {
        let expirer = UrlExpirer::new(FakeProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert!(!expirer
            .has_expired_at(url.as_str(), u64::MAX, at(2100, 1, 1, 0, 0, 0))
            .unwrap());
    }

    #[test]
    fn test_zero_window() {
        let expirer = UrlExpirer::new(FakeProtector);
        let issued = at(2016, 1, 1, 0, 0, 0);
        let url = expirer.expire_at(URL, issued).unwrap();
        assert!(!expirer.has_expired_at(url.as_str(), 0, issued).unwrap());
        assert!(expirer
            .has_expired_at(url.as_str(), 0, issued + TimeDelta::milliseconds(1))
            .unwrap());
    }

    #[test]
    fn test_custom_time_parameter() {
        let expirer = UrlExpirer::new(FakeProtector)
            .with_time_parameter("issued")
            .unwrap();
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(url.query(), Some("id=1&issued=20160101000000"));
        assert_eq!(expirer.time_parameter(), "issued");
    }

    #[test]
    fn test_bad_time_parameter_rejected() {
        assert!(UrlExpirer::new(FakeProtector).with_time_parameter("").is_err());
        assert!(UrlExpirer::new(FakeProtector).with_time_parameter("t#").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = ExpiryConfig {
            time_parameter: "ts".to_string(),
            valid_for_seconds: 60,
        };
        let expirer = UrlExpirer::from_config(FakeProtector, &config).unwrap();
        assert_eq!(expirer.time_parameter(), "ts");
    }

    #[test]
    fn test_relative_url_rejected() {
        let expirer = UrlExpirer::new(FakeProtector);
        let err = expirer.expire_at("/protect-me?id=1", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "InvalidState");
        let err = expirer.has_expired("/protect-me?id=1", ONE_DAY).unwrap_err();
        assert_eq!(err.code(), "InvalidState");
    }

    #[test]
    fn test_issued_at_reads_without_verifying() {
        let expirer = UrlExpirer::new(RejectingProtector);
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(
            expirer.issued_at(url.as_str()).unwrap(),
            Some(at(2016, 1, 1, 0, 0, 0))
        );
        assert_eq!(expirer.issued_at(URL).unwrap(), None);
    }

    #[test]
    fn test_link_status_strings() {
        let t = at(2016, 1, 1, 0, 0, 0);
        assert_eq!(LinkStatus::Valid { issued_at: t }.as_str(), "valid");
        assert_eq!(LinkStatus::Expired { issued_at: t }.as_str(), "expired");
        assert!(!LinkStatus::Valid { issued_at: t }.is_expired());
        assert!(LinkStatus::Expired { issued_at: t }.is_expired());
    }

    // ── with the real signer ────────────────────────────────────────

    #[test]
    fn test_signed_scenario_boundary() {
        let expirer = signed_expirer();
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();

        assert!(url.query().unwrap().starts_with("id=1&t=20160101000000&h="));
        assert!(!expirer
            .has_expired_at(url.as_str(), ONE_DAY, at(2016, 1, 2, 0, 0, 0))
            .unwrap());
        assert!(expirer
            .has_expired_at(url.as_str(), ONE_DAY, at(2016, 1, 2, 0, 0, 1))
            .unwrap());
    }

    #[test]
    fn test_signed_check_reports_issue_time() {
        let expirer = signed_expirer();
        let issued = at(2016, 1, 1, 0, 0, 0);
        let url = expirer.expire_at(URL, issued).unwrap();
        assert_eq!(
            expirer.check_at(url.as_str(), ONE_DAY, at(2016, 1, 1, 12, 0, 0)).unwrap(),
            LinkStatus::Valid { issued_at: issued }
        );
        assert_eq!(
            expirer.check_at(url.as_str(), ONE_DAY, at(2016, 1, 3, 0, 0, 0)).unwrap(),
            LinkStatus::Expired { issued_at: issued }
        );
    }

    #[test]
    fn test_signed_tampered_suffix_is_expired() {
        let expirer = signed_expirer();
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let tampered = format!("{url}&tampered-value");
        for now in [at(2016, 1, 1, 0, 0, 0), at(2016, 1, 1, 12, 0, 0), at(2016, 1, 2, 0, 0, 0)] {
            assert!(expirer.has_expired_at(&tampered, ONE_DAY, now).unwrap());
        }
    }

    #[test]
    fn test_signed_forged_timestamp_is_expired() {
        let expirer = signed_expirer();
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let forged = url.as_str().replace("t=20160101000000", "t=20260101000000");
        assert_eq!(
            expirer.check_at(&forged, ONE_DAY, at(2026, 1, 1, 1, 0, 0)).unwrap(),
            LinkStatus::Tampered
        );
    }

    #[test]
    fn test_signed_removed_timestamp_is_expired() {
        let expirer = signed_expirer();
        let url = expirer.expire_at(URL, at(2016, 1, 1, 0, 0, 0)).unwrap();
        let stripped = url.as_str().replace("&t=20160101000000", "");
        assert!(expirer.has_expired_at(&stripped, ONE_DAY, at(2016, 1, 1, 0, 0, 0)).unwrap());
    }

    #[test]
    fn test_signed_expire_of_protected_url_resigns() {
        let signer = UrlSigner::new("abc123").unwrap();
        let protected = signer.protect(URL).unwrap();
        let expirer = UrlExpirer::new(&signer);
        let url = expirer.expire_at(protected.as_str(), at(2016, 1, 1, 0, 0, 0)).unwrap();
        assert!(url.query().unwrap().starts_with("id=1&t=20160101000000&h="));
        assert!(expirer.protector().verify(url.as_str()).unwrap());
        assert!(!expirer
            .has_expired_at(url.as_str(), ONE_DAY, at(2016, 1, 1, 0, 0, 0))
            .unwrap());
    }

    #[test]
    fn test_expire_now_round_trip() {
        let expirer = signed_expirer();
        let url = expirer.expire(URL).unwrap();
        assert!(!expirer.has_expired(url.as_str(), 60).unwrap());
    }
}
