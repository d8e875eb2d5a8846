//! Engine-wide constants.

/// Minimum window fetched for an asset with no stored data when backfill is
/// off. Covers weekends and holidays so a single call still returns rows.
pub const MIN_RECENCY_WINDOW_DAYS: i64 = 5;

/// Newest stored bar may lag today by this many days before a forward
/// fill is planned.
pub const MAX_STALENESS_DAYS: i64 = 1;

/// Slack, in days, when comparing the oldest stored bar against the
/// historical floor. Weekends and holidays mean the first trading day
/// after the floor may be a few days later.
pub const FLOOR_TOLERANCE_DAYS: i64 = 5;

/// Share of expected rows, in percent, below which a stored window is
/// treated as having an internal gap.
pub const GAP_DETECTION_FILL_PERCENT: u64 = 60;

/// Default days fetched per backfill run.
pub const DEFAULT_DAYS_PER_RUN: i64 = 365;

/// Default depth of history kept per asset.
pub const DEFAULT_MAX_HISTORICAL_DAYS: i64 = 3650;

/// Assets processed concurrently in one backfill cycle.
pub const DEFAULT_BACKFILL_CONCURRENCY: usize = 4;

/// Default full-rebalance period for streaming assignments, in seconds.
pub const DEFAULT_REBALANCE_INTERVAL_SECS: u64 = 3600;

/// Default period of the monitoring loop, in seconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Default time a failed consumer sits out before it is eligible again, in seconds.
pub const DEFAULT_FAILURE_COOL_DOWN_SECS: u64 = 120;

/// Longest the orchestrator waits on one consumer's health check,
/// subscribe or disconnect, in seconds.
pub const DEFAULT_CONSUMER_CALL_TIMEOUT_SECS: u64 = 10;

/// Prefix of every environment variable the engine reads.
pub const ENV_PREFIX: &str = "QH_";
