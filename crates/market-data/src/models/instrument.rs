use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a tradeable symbol.
///
/// Used to select applicable providers and streaming consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentCategory {
    #[default]
    Equity,
    Etf,
    Crypto,
    Commodity,
    Index,
}

impl InstrumentCategory {
    pub const ALL: [InstrumentCategory; 5] = [
        Self::Equity,
        Self::Etf,
        Self::Crypto,
        Self::Commodity,
        Self::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "EQUITY",
            Self::Etf => "ETF",
            Self::Crypto => "CRYPTO",
            Self::Commodity => "COMMODITY",
            Self::Index => "INDEX",
        }
    }

    /// Crypto trades around the clock; everything else follows a weekday calendar.
    pub fn trades_weekends(&self) -> bool {
        matches!(self, Self::Crypto)
    }
}

impl fmt::Display for InstrumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of data requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    DayBar,
    IntradayBar,
    Profile,
    Financials,
    Estimates,
    EtfInfo,
    CryptoInfo,
    OnchainMetric,
}

impl DataKind {
    /// Whether this kind is answered with a bar series (as opposed to a single record).
    pub fn is_bar_series(&self) -> bool {
        matches!(self, Self::DayBar | Self::IntradayBar)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DayBar => "DAY_BAR",
            Self::IntradayBar => "INTRADAY_BAR",
            Self::Profile => "PROFILE",
            Self::Financials => "FINANCIALS",
            Self::Estimates => "ESTIMATES",
            Self::EtfInfo => "ETF_INFO",
            Self::CryptoInfo => "CRYPTO_INFO",
            Self::OnchainMetric => "ONCHAIN_METRIC",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar interval used for bar-series requests and stored ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum BarInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    #[default]
    OneDay,
}

impl BarInterval {
    /// Bars produced per trading day for this interval.
    ///
    /// Intraday counts assume a 6.5 hour session for weekday calendars and a
    /// full 24 hour session for categories that trade around the clock.
    pub fn bars_per_day(&self, category: InstrumentCategory) -> u64 {
        let session_minutes: u64 = if category.trades_weekends() { 24 * 60 } else { 390 };
        match self {
            Self::OneMinute => session_minutes,
            Self::FiveMinutes => session_minutes / 5,
            Self::FifteenMinutes => session_minutes / 15,
            Self::OneHour => session_minutes.div_ceil(60),
            Self::OneDay => 1,
        }
    }

    /// The data kind a request for this interval maps to.
    pub fn data_kind(&self) -> DataKind {
        match self {
            Self::OneDay => DataKind::DayBar,
            _ => DataKind::IntradayBar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for BarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
