//! Backfill planning.
//!
//! [`plan`] is a pure function of an [`AssetRangeState`] and the current
//! date. Rules are checked in order and the first match wins:
//!
//! 1. Nothing stored: initial window (backfill on) or a short recency window
//! 2. Newest bar is stale: forward fill up to today
//! 3. Backfill on: forward gap, then backward toward the floor, then an
//!    internal gap
//! 4. Otherwise no action
//!
//! Applying a plan moves the stored range toward the policy, so repeated
//! planning converges on [`FetchPlan::NoAction`].

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use quotehub_market_data::{BarInterval, InstrumentCategory};

use super::backfill_model::{
    days_after, days_before, AssetRangeState, FetchPlan, FetchWindow, PlanReason, StoredRange,
};
use crate::constants::{
    FLOOR_TOLERANCE_DAYS, GAP_DETECTION_FILL_PERCENT, MAX_STALENESS_DAYS, MIN_RECENCY_WINDOW_DAYS,
};

/// Compute the next fetch window for one (asset, interval).
pub fn plan(state: &AssetRangeState, today: NaiveDate) -> FetchPlan {
    let policy = &state.policy;
    let days_per_run = policy.days_per_run();
    let floor = match state.earliest_available {
        Some(start) => policy.floor(today).max(start),
        None => policy.floor(today),
    };

    let Some(stored) = state.stored else {
        return if policy.enabled {
            let start = days_before(today, days_per_run - 1).max(floor).min(today);
            fetch(state, start, today, true, PlanReason::Initial)
        } else {
            let start = days_before(today, MIN_RECENCY_WINDOW_DAYS);
            fetch(state, start, today, false, PlanReason::RecencyOnly)
        };
    };

    // Recency before depth. Both recency checks measure against the last
    // trading session, so a weekend never opens a window.
    let effective_today = last_trading_day(today, state.category);
    if stored.newest < days_before(effective_today, MAX_STALENESS_DAYS) {
        return fetch(
            state,
            days_after(stored.newest, 1),
            today,
            false,
            PlanReason::ForwardFill,
        );
    }

    if !policy.enabled {
        return FetchPlan::NoAction;
    }

    if stored.newest < days_before(effective_today, days_per_run) {
        return fetch(
            state,
            days_after(stored.newest, 1),
            today,
            true,
            PlanReason::ForwardGap,
        );
    }

    if stored.oldest > days_after(floor, FLOOR_TOLERANCE_DAYS) {
        let start = floor.max(days_before(stored.oldest, days_per_run));
        let end = days_before(stored.oldest, 1);
        return fetch(state, start, end, true, PlanReason::BackwardFill);
    }

    if let Some(gap) = state.gap {
        let inside = gap.start <= gap.end
            && gap.start > floor
            && gap.end < today
            && gap.start > stored.oldest
            && gap.end < stored.newest;
        if inside && is_sparse(&stored, floor, state.interval, state.category) {
            return fetch(state, gap.start, gap.end, true, PlanReason::InternalGap);
        }
    }

    FetchPlan::NoAction
}

fn fetch(
    state: &AssetRangeState,
    start: NaiveDate,
    end: NaiveDate,
    is_backfill: bool,
    reason: PlanReason,
) -> FetchPlan {
    FetchPlan::Fetch(FetchWindow {
        start,
        end,
        limit: row_ceiling(start, end, state.interval, state.category),
        is_backfill,
        reason,
    })
}

/// Whether the stored rows fall short of what the stored span should hold.
fn is_sparse(
    stored: &StoredRange,
    floor: NaiveDate,
    interval: BarInterval,
    category: InstrumentCategory,
) -> bool {
    let expected = expected_rows(stored.oldest.max(floor), stored.newest, interval, category);
    stored.row_count.saturating_mul(100) < expected.saturating_mul(GAP_DETECTION_FILL_PERCENT)
}

/// Rows a complete window should hold for the category's trading calendar.
pub fn expected_rows(
    start: NaiveDate,
    end: NaiveDate,
    interval: BarInterval,
    category: InstrumentCategory,
) -> u64 {
    trading_days(start, end, category).saturating_mul(interval.bars_per_day(category))
}

/// Generous ceiling: every calendar day in the window, at least one row.
fn row_ceiling(
    start: NaiveDate,
    end: NaiveDate,
    interval: BarInterval,
    category: InstrumentCategory,
) -> usize {
    let days = (end - start).num_days().max(0) as u64 + 1;
    let rows = days.saturating_mul(interval.bars_per_day(category)).max(1);
    usize::try_from(rows).unwrap_or(usize::MAX)
}

/// Trading days in `[start, end]`. Weekends count only for categories
/// that trade every day.
pub fn trading_days(start: NaiveDate, end: NaiveDate, category: InstrumentCategory) -> u64 {
    if end < start {
        return 0;
    }
    let total = (end - start).num_days() as u64 + 1;
    if category.trades_weekends() {
        return total;
    }

    let full_weeks = total / 7;
    let mut days = full_weeks * 5;
    let mut day = start + Duration::days((full_weeks * 7) as i64);
    while day <= end {
        if !is_weekend(day) {
            days += 1;
        }
        day += Duration::days(1);
    }
    days
}

/// Latest date on or before `today` with a trading session.
fn last_trading_day(today: NaiveDate, category: InstrumentCategory) -> NaiveDate {
    if category.trades_weekends() {
        return today;
    }
    match today.weekday() {
        Weekday::Sat => today - Duration::days(1),
        Weekday::Sun => today - Duration::days(2),
        _ => today,
    }
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::backfill_model::{BackfillPolicy, DateGap};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Wednesday
    fn today() -> NaiveDate {
        date(2024, 6, 12)
    }

    fn state(stored: Option<StoredRange>, policy: BackfillPolicy) -> AssetRangeState {
        AssetRangeState {
            asset_id: "AAPL".to_string(),
            interval: BarInterval::OneDay,
            category: InstrumentCategory::Equity,
            stored,
            gap: None,
            earliest_available: None,
            policy,
        }
    }

    fn policy(days_per_run: i64, max_historical_days: i64) -> BackfillPolicy {
        BackfillPolicy {
            enabled: true,
            days_per_run,
            max_historical_days,
            min_historical_date: None,
        }
    }

    fn full(oldest: NaiveDate, newest: NaiveDate) -> StoredRange {
        StoredRange {
            oldest,
            newest,
            row_count: trading_days(oldest, newest, InstrumentCategory::Equity),
        }
    }

    fn window(plan: FetchPlan) -> FetchWindow {
        *plan.window().expect("expected a fetch window")
    }

    #[test]
    fn test_no_data_with_backfill_plans_initial_window() {
        let w = window(plan(&state(None, policy(30, 365)), today()));
        assert_eq!(w.reason, PlanReason::Initial);
        assert_eq!(w.start, date(2024, 5, 14));
        assert_eq!(w.end, today());
        assert!(w.is_backfill);
        assert_eq!(w.limit, 30);
    }

    #[test]
    fn test_no_data_without_backfill_plans_recency_window() {
        let disabled = BackfillPolicy {
            enabled: false,
            ..policy(30, 365)
        };
        let w = window(plan(&state(None, disabled), today()));
        assert_eq!(w.reason, PlanReason::RecencyOnly);
        assert_eq!(w.start, date(2024, 6, 7));
        assert!(!w.is_backfill);
    }

    #[test]
    fn test_stale_data_forward_fills_before_depth() {
        // Also far from the floor; recency still wins.
        let stored = full(date(2024, 5, 1), date(2024, 6, 7));
        let w = window(plan(&state(Some(stored), policy(30, 3650)), today()));
        assert_eq!(w.reason, PlanReason::ForwardFill);
        assert_eq!(w.start, date(2024, 6, 8));
        assert_eq!(w.end, today());
        assert!(!w.is_backfill);
    }

    #[test]
    fn test_weekend_does_not_count_as_stale() {
        let sunday = date(2024, 6, 16);
        let stored = full(date(2023, 6, 1), date(2024, 6, 14));
        let p = plan(&state(Some(stored), policy(30, 365)), sunday);
        assert!(p.is_no_action());
    }

    #[test]
    fn test_backward_fill_in_chunks_down_to_floor() {
        let stored = full(date(2024, 3, 1), today());
        let w = window(plan(&state(Some(stored), policy(30, 365)), today()));
        assert_eq!(w.reason, PlanReason::BackwardFill);
        assert_eq!(w.start, date(2024, 1, 31));
        assert_eq!(w.end, date(2024, 2, 29));

        // Last chunk stops at the floor.
        let stored = full(date(2023, 6, 20), today());
        let w = window(plan(&state(Some(stored), policy(30, 365)), today()));
        assert_eq!(w.start, date(2023, 6, 13));
    }

    #[test]
    fn test_weekend_does_not_open_a_forward_gap() {
        // Current through Friday, one-day runs, planned on Sunday.
        let sunday = date(2024, 6, 16);
        let stored = full(date(2023, 6, 1), date(2024, 6, 14));
        assert!(plan(&state(Some(stored), policy(1, 365)), sunday).is_no_action());

        // Saturday too.
        assert!(plan(&state(Some(stored), policy(1, 365)), date(2024, 6, 15)).is_no_action());
    }

    #[test]
    fn test_known_history_start_stops_backward_fill() {
        let listed = date(2024, 1, 2);
        let mut s = state(Some(full(listed, today())), policy(365, 3650));
        let w = window(plan(&s, today()));
        assert_eq!(w.reason, PlanReason::BackwardFill);
        assert_eq!(w.end, date(2024, 1, 1));

        s.earliest_available = Some(listed);
        assert!(plan(&s, today()).is_no_action());
    }

    #[test]
    fn test_extreme_policy_values_do_not_panic() {
        let huge = BackfillPolicy {
            enabled: true,
            days_per_run: i64::MAX,
            max_historical_days: 200_000_000,
            min_historical_date: None,
        };

        let w = window(plan(&state(None, huge.clone()), today()));
        assert_eq!(w.start, NaiveDate::MIN);
        assert_eq!(w.end, today());

        let stored = full(date(2024, 3, 1), today());
        let w = window(plan(&state(Some(stored), huge.clone()), today()));
        assert_eq!(w.reason, PlanReason::BackwardFill);
        assert_eq!(w.start, NaiveDate::MIN);
        assert_eq!(w.end, date(2024, 2, 29));

        let at_floor = full(NaiveDate::MIN, today());
        assert!(plan(&state(Some(at_floor), huge), today()).is_no_action());

        let negative = BackfillPolicy {
            enabled: true,
            days_per_run: i64::MIN,
            max_historical_days: i64::MIN,
            min_historical_date: None,
        };
        let w = window(plan(&state(None, negative), today()));
        assert_eq!((w.start, w.end), (today(), today()));
    }

    #[test]
    fn test_min_historical_date_is_the_floor() {
        let mut p = policy(30, 3650);
        p.min_historical_date = Some(date(2024, 1, 1));

        let stored = full(date(2024, 1, 3), today());
        assert!(plan(&state(Some(stored), p.clone()), today()).is_no_action());

        let stored = full(date(2024, 1, 20), today());
        let w = window(plan(&state(Some(stored), p), today()));
        assert_eq!(w.start, date(2024, 1, 1));
    }

    #[test]
    fn test_internal_gap_is_planned_when_sparse() {
        let oldest = date(2023, 6, 14);
        let mut s = state(
            Some(StoredRange {
                oldest,
                newest: today(),
                row_count: 100,
            }),
            policy(30, 365),
        );
        s.gap = Some(DateGap {
            start: date(2023, 9, 1),
            end: date(2024, 2, 1),
        });

        let w = window(plan(&s, today()));
        assert_eq!(w.reason, PlanReason::InternalGap);
        assert_eq!((w.start, w.end), (date(2023, 9, 1), date(2024, 2, 1)));

        // Same hole but the rows are all there: nothing to do.
        s.stored = Some(full(oldest, today()));
        assert!(plan(&s, today()).is_no_action());
    }

    #[test]
    fn test_satisfied_asset_is_not_replanned() {
        let stored = full(date(2023, 6, 13), today());
        let s = state(Some(stored), policy(30, 365));
        assert_eq!(plan(&s, today()), FetchPlan::NoAction);
        assert_eq!(plan(&s, today()), FetchPlan::NoAction);
    }

    #[test]
    fn test_disabled_backfill_only_tracks_recency() {
        let disabled = BackfillPolicy {
            enabled: false,
            ..policy(30, 3650)
        };
        let stored = full(date(2024, 6, 1), today());
        assert!(plan(&state(Some(stored), disabled), today()).is_no_action());
    }

    #[test]
    fn test_trading_days() {
        // Mon..Sun
        let mon = date(2024, 6, 10);
        let sun = date(2024, 6, 16);
        assert_eq!(trading_days(mon, sun, InstrumentCategory::Equity), 5);
        assert_eq!(trading_days(mon, sun, InstrumentCategory::Crypto), 7);
        assert_eq!(trading_days(sun, mon, InstrumentCategory::Equity), 0);
        assert_eq!(
            trading_days(date(2024, 1, 1), date(2024, 12, 31), InstrumentCategory::Etf),
            262
        );
    }
}
