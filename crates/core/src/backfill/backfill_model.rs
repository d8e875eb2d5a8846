use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use quotehub_market_data::{BarInterval, InstrumentCategory};

use crate::constants::{DEFAULT_DAYS_PER_RUN, DEFAULT_MAX_HISTORICAL_DAYS};

/// How much history an asset should eventually hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackfillPolicy {
    pub enabled: bool,
    /// Days covered by one backfill fetch.
    pub days_per_run: i64,
    /// Depth of history relative to today.
    pub max_historical_days: i64,
    /// Absolute floor; history before this date is never requested.
    pub min_historical_date: Option<NaiveDate>,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            days_per_run: DEFAULT_DAYS_PER_RUN,
            max_historical_days: DEFAULT_MAX_HISTORICAL_DAYS,
            min_historical_date: None,
        }
    }
}

impl BackfillPolicy {
    /// Oldest date history should reach as of `today`.
    ///
    /// The tighter of the relative depth and the absolute floor.
    pub fn floor(&self, today: NaiveDate) -> NaiveDate {
        let relative = days_before(today, self.max_historical_days);
        match self.min_historical_date {
            Some(min) => relative.max(min),
            None => relative,
        }
    }

    pub fn days_per_run(&self) -> i64 {
        self.days_per_run.max(1)
    }
}

/// `days` before `date`, saturating at [`NaiveDate::MIN`]. Negative counts
/// are treated as zero.
pub(crate) fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_sub_days(Days::new(days.max(0).unsigned_abs()))
        .unwrap_or(NaiveDate::MIN)
}

/// `days` after `date`, saturating at [`NaiveDate::MAX`].
pub(crate) fn days_after(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_days(Days::new(days.max(0).unsigned_abs()))
        .unwrap_or(NaiveDate::MAX)
}

/// Bounds and size of what is already stored for one (asset, interval).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRange {
    pub oldest: NaiveDate,
    pub newest: NaiveDate,
    pub row_count: u64,
}

/// A hole between two stored rows, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateGap {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Everything the planner needs for one (asset, interval).
///
/// Loaded fresh from storage for every planning call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRangeState {
    pub asset_id: String,
    pub interval: BarInterval,
    pub category: InstrumentCategory,
    pub stored: Option<StoredRange>,
    /// Largest hole inside the stored range, when storage found one.
    pub gap: Option<DateGap>,
    /// First date the vendors have data for, once a backward fill came
    /// back empty. Acts as a floor.
    pub earliest_available: Option<NaiveDate>,
    pub policy: BackfillPolicy,
}

/// Why a window was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// First fetch for an asset with backfill enabled.
    Initial,
    /// First fetch for an asset with backfill disabled.
    RecencyOnly,
    /// Newest stored bar is stale.
    ForwardFill,
    /// Stored history ends before the current backfill window.
    ForwardGap,
    /// Stored history does not yet reach the floor.
    BackwardFill,
    /// Stored history has a hole.
    InternalGap,
}

/// A window to fetch, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Row ceiling for the request.
    pub limit: usize,
    pub is_backfill: bool,
    pub reason: PlanReason,
}

/// Planner output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    Fetch(FetchWindow),
    NoAction,
}

impl FetchPlan {
    pub fn window(&self) -> Option<&FetchWindow> {
        match self {
            Self::Fetch(window) => Some(window),
            Self::NoAction => None,
        }
    }

    pub fn is_no_action(&self) -> bool {
        matches!(self, Self::NoAction)
    }
}

/// What happened to one (asset, interval) in a backfill cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    NoAction,
    Fetched {
        provider: String,
        window: FetchWindow,
        rows: usize,
    },
    /// Nothing exists before the stored range; recorded as the history start.
    HistoryStart {
        window: FetchWindow,
        starts: NaiveDate,
    },
    Failed {
        message: String,
    },
}

/// Result of one (asset, interval) in a backfill cycle.
#[derive(Debug, Clone)]
pub struct AssetBackfillResult {
    pub asset_id: String,
    pub interval: BarInterval,
    pub outcome: BackfillOutcome,
}

/// Aggregate result of a backfill cycle.
#[derive(Debug, Clone, Default)]
pub struct BackfillCycleReport {
    /// Pairs that produced a fetch plan.
    pub planned: usize,
    pub no_action: usize,
    pub fetched_rows: usize,
    /// Pairs whose history start was recorded this cycle.
    pub history_starts: usize,
    pub failed: usize,
    /// (asset id, message) per failure.
    pub failures: Vec<(String, String)>,
}

impl BackfillCycleReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} planned, {} up to date, {} rows stored, {} failed",
            self.planned, self.no_action, self.fetched_rows, self.failed
        )
    }

    pub(crate) fn add_result(&mut self, result: AssetBackfillResult) {
        match result.outcome {
            BackfillOutcome::NoAction => self.no_action += 1,
            BackfillOutcome::Fetched { rows, .. } => {
                self.planned += 1;
                self.fetched_rows += rows;
            }
            BackfillOutcome::HistoryStart { .. } => {
                self.planned += 1;
                self.history_starts += 1;
            }
            BackfillOutcome::Failed { message } => {
                self.planned += 1;
                self.failed += 1;
                self.failures.push((result.asset_id, message));
            }
        }
    }
}
