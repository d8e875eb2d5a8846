use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::RawRecord;

/// Raw bar rows as returned by a vendor adapter.
///
/// The core never inspects vendor payload shapes beyond what the
/// validator extracts from these rows.
pub type RawSeries = Vec<RawRecord>;

/// One normalized bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBar {
    pub timestamp: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    /// Never negative; missing volume is stored as zero.
    pub volume: Decimal,
    /// Percent change of close against the previous bar's close.
    pub percent_change: Option<Decimal>,
}

/// Time-ordered bar series with unique timestamps.
///
/// Only the validator constructs this type, so holding one means the
/// series passed every rejection rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBarSeries {
    pub(crate) bars: Vec<NormalizedBar>,
}

impl NormalizedBarSeries {
    /// Build a series from already-normalized bars, sorting by time and
    /// keeping the last occurrence of a duplicated timestamp.
    pub fn from_bars(bars: Vec<NormalizedBar>) -> Self {
        let mut by_time = std::collections::BTreeMap::new();
        for bar in bars {
            by_time.insert(bar.timestamp, bar);
        }
        Self {
            bars: by_time.into_values().collect(),
        }
    }

    pub fn bars(&self) -> &[NormalizedBar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<NormalizedBar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// Keep only the most recent `limit` bars.
    pub(crate) fn truncate_to_latest(&mut self, limit: usize) {
        if self.bars.len() > limit {
            let excess = self.bars.len() - limit;
            self.bars.drain(..excess);
        }
    }
}

/// Single-record payload (profile, financials, ETF info, ...).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub fields: RawRecord,
}

/// What a successful fetch carries.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchPayload {
    Bars(NormalizedBarSeries),
    Record(ProfileRecord),
}

impl FetchPayload {
    pub fn as_bars(&self) -> Option<&NormalizedBarSeries> {
        match self {
            Self::Bars(series) => Some(series),
            Self::Record(_) => None,
        }
    }

    pub fn into_bars(self) -> Option<NormalizedBarSeries> {
        match self {
            Self::Bars(series) => Some(series),
            Self::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&ProfileRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Bars(_) => None,
        }
    }
}
