use async_trait::async_trait;
use chrono::NaiveDate;

use quotehub_market_data::{BarInterval, NormalizedBar};

use super::backfill_model::{DateGap, StoredRange};
use crate::errors::Result;

/// Persistence boundary for stored bars.
#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Bounds and row count of stored bars, `None` when nothing is stored.
    fn get_range_state(&self, asset_id: &str, interval: BarInterval) -> Result<Option<StoredRange>>;

    /// Largest hole between consecutive stored bars inside `[start, end]`.
    fn find_gap(
        &self,
        asset_id: &str,
        interval: BarInterval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<DateGap>>;

    /// Earliest date vendors have data for, once recorded.
    fn history_start(&self, asset_id: &str, interval: BarInterval) -> Result<Option<NaiveDate>>;

    /// Record that nothing exists before `date`. Backward fills stop there.
    fn mark_history_start(
        &self,
        asset_id: &str,
        interval: BarInterval,
        date: NaiveDate,
    ) -> Result<()>;

    /// Insert or replace bars keyed on timestamp. Returns rows written.
    async fn upsert_bars(
        &self,
        asset_id: &str,
        interval: BarInterval,
        bars: &[NormalizedBar],
    ) -> Result<usize>;
}
