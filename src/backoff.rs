//! Polling interval calculator.
//!
//! Pure functions that decide when a feed should next be fetched, from
//! origin cache hints and the feed's consecutive failure count. No I/O.

use chrono::{DateTime, Duration, Utc};

/// Base retry interval after the first failure (30 minutes).
pub const FAILURE_BASE_SECS: i64 = 30 * 60;

/// Failure count cap applied before exponentiation.
pub const MAX_FAILURE_EXPONENT: i32 = 10;

/// Minimum accepted polling interval (1 minute).
pub const MIN_INTERVAL_SECS: i64 = 60;

/// Maximum polling interval (7 days).
pub const MAX_INTERVAL_SECS: i64 = 7 * 24 * 60 * 60;

/// Polling interval used when the origin provides no hint (15 minutes).
pub const DEFAULT_INTERVAL_SECS: i64 = 15 * 60;

/// Why a particular interval was chosen, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalReason {
    /// Exponential backoff after consecutive failures.
    Backoff,
    /// Origin-provided max-age, within bounds.
    CacheControl,
    /// Origin max-age was below the minimum and was raised to it.
    CacheControlClampedMin,
    /// Origin max-age was above the maximum and was lowered to it.
    CacheControlClampedMax,
    /// No hint available; default interval.
    Default,
}

impl IntervalReason {
    /// Stable string form for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalReason::Backoff => "backoff",
            IntervalReason::CacheControl => "cache_control",
            IntervalReason::CacheControlClampedMin => "cache_control_clamped_min",
            IntervalReason::CacheControlClampedMax => "cache_control_clamped_max",
            IntervalReason::Default => "default",
        }
    }
}

/// Cache freshness hints reported by the fetch collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHints {
    /// max-age directive in seconds, if present.
    pub max_age: Option<i64>,
}

impl CacheHints {
    /// Parse hints from a Cache-Control header value.
    ///
    /// `no-store` and `no-cache` yield no hint; a malformed max-age value is
    /// ignored rather than treated as zero.
    pub fn from_header(header: &str) -> Self {
        let mut max_age = None;

        for directive in header.split(',') {
            let directive = directive.trim();
            let lower = directive.to_ascii_lowercase();

            if lower == "no-store" || lower == "no-cache" {
                return Self::default();
            }

            if let Some(value) = lower.strip_prefix("max-age=") {
                if let Ok(secs) = value.trim().parse::<i64>() {
                    if secs >= 0 {
                        max_age = Some(secs);
                    }
                }
            }
        }

        Self { max_age }
    }
}

/// The scheduling decision for a feed's next fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSchedule {
    /// When the next fetch should run.
    pub next_run_at: DateTime<Utc>,
    /// The interval that produced it, in seconds.
    pub interval_seconds: i64,
    /// Why this interval was chosen.
    pub reason: IntervalReason,
}

/// Compute the next fetch time for a feed.
///
/// Failures take priority over cache hints: a server that is down must not
/// be hammered even if it once advertised a short max-age. The failure count
/// is capped before exponentiation.
pub fn calculate_next_fetch(
    hints: Option<&CacheHints>,
    consecutive_failures: i32,
    now: DateTime<Utc>,
) -> FetchSchedule {
    let (interval_seconds, reason) = if consecutive_failures > 0 {
        let exponent = consecutive_failures.min(MAX_FAILURE_EXPONENT) - 1;
        let interval = FAILURE_BASE_SECS.saturating_mul(1i64 << exponent);
        (interval.min(MAX_INTERVAL_SECS), IntervalReason::Backoff)
    } else {
        match hints.and_then(|h| h.max_age) {
            Some(max_age) if max_age < MIN_INTERVAL_SECS => {
                (MIN_INTERVAL_SECS, IntervalReason::CacheControlClampedMin)
            }
            Some(max_age) if max_age > MAX_INTERVAL_SECS => {
                (MAX_INTERVAL_SECS, IntervalReason::CacheControlClampedMax)
            }
            Some(max_age) => (max_age, IntervalReason::CacheControl),
            None => (DEFAULT_INTERVAL_SECS, IntervalReason::Default),
        }
    };

    FetchSchedule {
        next_run_at: now + Duration::seconds(interval_seconds),
        interval_seconds,
        reason,
    }
}
