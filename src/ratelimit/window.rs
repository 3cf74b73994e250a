//! Rate specifications and fixed-window resolution.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::QuotaMockError;

static RATE_SPEC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)/([smh])$").expect("rate spec pattern is valid"));

/// Granularity of a rate limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
}

impl TimeUnit {
    /// Length of one window in milliseconds.
    pub const fn millis(&self) -> u64 {
        match self {
            TimeUnit::Second => 1_000,
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
        }
    }

    /// Parse the single-letter suffix used in rate specifications.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(TimeUnit::Second),
            "m" => Some(TimeUnit::Minute),
            "h" => Some(TimeUnit::Hour),
            _ => None,
        }
    }

    /// The single-letter suffix for this unit.
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
        }
    }
}

/// A parsed `<quota>/<unit>` rate specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    /// Maximum requests allowed per window, always greater than zero
    pub quota: u64,
    /// Window granularity
    pub unit: TimeUnit,
}

impl RateSpec {
    /// Create a rate specification, rejecting a zero quota.
    pub fn new(quota: u64, unit: TimeUnit) -> Option<Self> {
        (quota > 0).then_some(Self { quota, unit })
    }

    /// Parse a raw `rateLimit` value such as `10/s`.
    pub fn parse(raw: &str) -> Result<Self, QuotaMockError> {
        let invalid = || QuotaMockError::InvalidRateSpec(raw.to_string());

        let captures = RATE_SPEC_PATTERN.captures(raw).ok_or_else(invalid)?;
        let quota: u64 = captures[1].parse().map_err(|_| invalid())?;
        let unit = TimeUnit::from_suffix(&captures[2]).ok_or_else(invalid)?;

        RateSpec::new(quota, unit).ok_or_else(invalid)
    }

    /// Resolve the window this spec falls into at `now_ms`.
    pub fn resolve(&self, now_ms: u64) -> WindowSpec {
        WindowSpec::resolve(self.unit, now_ms)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.quota, self.unit.suffix())
    }
}

/// The fixed window a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub unit_millis: u64,
    /// `now_ms / unit_millis`
    pub window_index: u64,
    /// Start of the next window, in epoch milliseconds
    pub reset_at_ms: u64,
}

impl WindowSpec {
    pub fn resolve(unit: TimeUnit, now_ms: u64) -> Self {
        let unit_millis = unit.millis();
        let window_index = now_ms / unit_millis;
        Self {
            unit_millis,
            window_index,
            reset_at_ms: (window_index + 1) * unit_millis,
        }
    }
}
