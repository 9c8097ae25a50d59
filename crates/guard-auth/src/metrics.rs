//! Metrics for LDAP authentication
//!
//! Recorded through the `metrics` facade; installing an exporter is up to the
//! embedding process.

use guard_core::Result;
use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names
pub mod names {
    pub const AUTH_ATTEMPTS_TOTAL: &str = "guard_ldap_auth_attempts_total";
    pub const AUTH_DURATION_SECONDS: &str = "guard_ldap_auth_duration_seconds";
}

/// Outcome label of a successful attempt
pub const OUTCOME_SUCCESS: &str = "success";

/// Outcome label of an attempt: `success` or the error code
pub fn outcome<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => OUTCOME_SUCCESS,
        Err(e) => e.code(),
    }
}

/// Record one finished authentication attempt
pub fn record_attempt(outcome: &'static str, elapsed: Duration) {
    counter!(names::AUTH_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::AUTH_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}
