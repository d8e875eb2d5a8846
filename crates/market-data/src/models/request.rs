use chrono::{DateTime, Utc};

use super::instrument::{BarInterval, DataKind, InstrumentCategory};
use super::types::{ProviderId, Symbol};

/// Default row ceiling when the caller does not set one.
pub const DEFAULT_ROW_LIMIT: usize = 5000;

/// Inclusive time window for bar requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// A single caller request for market data.
///
/// Stateless: created per invocation and consumed by the failover engine.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub symbol: Symbol,
    pub category: InstrumentCategory,
    pub kind: DataKind,
    /// Bar interval, only meaningful for bar kinds.
    pub interval: BarInterval,
    /// Explicit window; providers use their own default window when absent.
    pub range: Option<DateRange>,
    /// Maximum number of rows to keep.
    pub limit: usize,
    /// Provider to try first. Its failure still falls through to the rest of the list.
    pub preferred_provider: Option<ProviderId>,
}

impl FetchRequest {
    /// Daily bar request with the default row ceiling.
    pub fn day_bars(symbol: impl Into<Symbol>, category: InstrumentCategory) -> Self {
        Self::bars(symbol, category, BarInterval::OneDay)
    }

    pub fn bars(symbol: impl Into<Symbol>, category: InstrumentCategory, interval: BarInterval) -> Self {
        Self {
            symbol: symbol.into(),
            category,
            kind: interval.data_kind(),
            interval,
            range: None,
            limit: DEFAULT_ROW_LIMIT,
            preferred_provider: None,
        }
    }

    /// Single-record request (profile, financials, ...).
    pub fn record(symbol: impl Into<Symbol>, category: InstrumentCategory, kind: DataKind) -> Self {
        Self {
            symbol: symbol.into(),
            category,
            kind,
            interval: BarInterval::OneDay,
            range: None,
            limit: 1,
            preferred_provider: None,
        }
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.range = Some(DateRange::new(start, end));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }
}
