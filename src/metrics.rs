//! Metric names for urlseal.
//!
//! Counters are emitted through the `metrics` facade.  They are no-ops
//! until the host application installs a recorder (Prometheus or
//! otherwise); call [`describe_metrics`] after installing it.

use metrics::describe_counter;

/// URLs protected (counter).
pub const PROTECT_TOTAL: &str = "urlseal_protect_total";

/// URL verifications (counter). Labels: outcome (`valid`, `invalid`).
pub const VERIFY_TOTAL: &str = "urlseal_verify_total";

/// Expiry checks (counter). Labels: status (see `LinkStatus::as_str`).
pub const EXPIRY_CHECKS_TOTAL: &str = "urlseal_expiry_checks_total";

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(PROTECT_TOTAL, "Total URLs protected with a hash");
    describe_counter!(VERIFY_TOTAL, "Total URL hash verifications by outcome");
    describe_counter!(EXPIRY_CHECKS_TOTAL, "Total URL expiry checks by status");
}
