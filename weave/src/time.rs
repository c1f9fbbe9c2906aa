use chrono::{DateTime, Utc};
use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("clock rolled back past the epoch")
        .as_secs()
}

/// The current wall-clock instant as a UTC `chrono` timestamp, matching
/// `server/services/authenticator`'s own `chrono::Utc::now()` for anything
/// in the workspace that needs a human-readable, timezone-aware timestamp
/// rather than a bare unix epoch count (e.g. a startup banner or a log file
/// name) - see [`now_utc_rfc3339`].
#[inline]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// `now_utc()` rendered as an RFC 3339 string, the form `loom-server` prints
/// in its startup/shutdown log lines.
#[inline]
pub fn now_utc_rfc3339() -> String {
    now_utc().to_rfc3339()
}

/// Milliseconds elapsed between two [`Instant`]s, saturating at zero so a clock
/// that appears to move backwards never underflows.
#[inline]
pub fn elapsed_ms(since: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}
