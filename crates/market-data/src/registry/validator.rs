//! Bar series validation.
//!
//! Turns a provider's raw rows into a [`NormalizedBarSeries`] or rejects
//! them. Rules, applied in order:
//! - Find the timestamp field and drop rows whose timestamp does not parse
//! - De-duplicate by timestamp (last occurrence wins), sort ascending
//! - Reject an empty series
//! - Reject when any present price field is null or zero in more than
//!   the allowed share of rows
//! - Log OHLC anomalies without rejecting
//! - Clamp volume to a non-negative value (missing counts as zero)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::MarketDataError;
use crate::models::{NormalizedBar, NormalizedBarSeries, RawRecord, RawSeries};

/// Field names searched, in order, for the bar timestamp.
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "datetime", "date", "time", "t"];

const OPEN_FIELDS: &[&str] = &["open", "o"];
const HIGH_FIELDS: &[&str] = &["high", "h"];
const LOW_FIELDS: &[&str] = &["low", "l"];
const CLOSE_FIELDS: &[&str] = &["close", "c", "price"];
const VOLUME_FIELDS: &[&str] = &["volume", "v", "vol"];
const PERCENT_CHANGE_FIELDS: &[&str] = &["percent_change", "changePercent", "change_percent"];

/// Epoch values above this are milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Highest share of null-or-zero cells, in percent, a price field may
    /// carry before the series is rejected. The boundary itself passes.
    pub max_null_or_zero_percent: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_null_or_zero_percent: 5,
        }
    }
}

/// The rule that rejected a series.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionRule {
    /// No row carries a recognized timestamp field.
    NoTimestampField,
    /// Nothing left after dropping unparsable timestamps.
    Empty,
    /// A price field is null or zero too often.
    TooManyNullOrZero {
        field: &'static str,
        bad: usize,
        total: usize,
    },
}

impl fmt::Display for RejectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTimestampField => write!(f, "no recognizable timestamp field"),
            Self::Empty => write!(f, "empty series"),
            Self::TooManyNullOrZero { field, bad, total } => {
                write!(f, "{bad}/{total} null or zero values in '{field}'")
            }
        }
    }
}

/// What the validator observed on an accepted series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub rows_in: usize,
    pub unparsable_timestamps: usize,
    pub duplicates: usize,
    pub ohlc_anomalies: usize,
    pub clamped_volumes: usize,
}

/// Intermediate row after timestamp coercion.
struct ParsedRow<'a> {
    timestamp: DateTime<Utc>,
    raw: &'a RawRecord,
}

/// Accept/reject gate for raw bar series.
pub struct BarSeriesValidator {
    config: ValidatorConfig,
}

impl BarSeriesValidator {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a raw series, mapping a rejection to
    /// [`MarketDataError::ValidationFailed`].
    pub fn validate(
        &self,
        raw: &RawSeries,
        provider: &str,
        symbol: &str,
    ) -> Result<NormalizedBarSeries, MarketDataError> {
        self.validate_with_report(raw, provider, symbol)
            .map(|(series, _)| series)
            .map_err(|rule| MarketDataError::ValidationFailed {
                provider: provider.to_string(),
                message: format!("{symbol}: {rule}"),
            })
    }

    /// Validate a raw series and return what was observed along the way.
    pub fn validate_with_report(
        &self,
        raw: &RawSeries,
        provider: &str,
        symbol: &str,
    ) -> Result<(NormalizedBarSeries, ValidationReport), RejectionRule> {
        let mut report = ValidationReport {
            rows_in: raw.len(),
            ..Default::default()
        };

        let Some(ts_field) = find_timestamp_field(raw) else {
            if raw.is_empty() {
                return self.reject(provider, symbol, RejectionRule::Empty);
            }
            return self.reject(provider, symbol, RejectionRule::NoTimestampField);
        };

        // Dedup on insert: BTreeMap keeps the last row for a timestamp and
        // iterates in ascending order.
        let mut by_time: BTreeMap<DateTime<Utc>, ParsedRow<'_>> = BTreeMap::new();
        for row in raw {
            match row.get(ts_field).and_then(parse_timestamp) {
                Some(timestamp) => {
                    if by_time
                        .insert(timestamp, ParsedRow { timestamp, raw: row })
                        .is_some()
                    {
                        report.duplicates += 1;
                    }
                }
                None => report.unparsable_timestamps += 1,
            }
        }

        if report.unparsable_timestamps > 0 {
            debug!(
                "{} {}: dropped {} row(s) with unparsable '{}'",
                provider, symbol, report.unparsable_timestamps, ts_field
            );
        }

        if by_time.is_empty() {
            return self.reject(provider, symbol, RejectionRule::Empty);
        }

        let rows: Vec<ParsedRow<'_>> = by_time.into_values().collect();

        for (name, aliases) in [
            ("open", OPEN_FIELDS),
            ("high", HIGH_FIELDS),
            ("low", LOW_FIELDS),
            ("close", CLOSE_FIELDS),
        ] {
            if let Some(rule) = self.check_price_field(&rows, name, aliases) {
                return self.reject(provider, symbol, rule);
            }
        }

        let mut bars = Vec::with_capacity(rows.len());
        let mut prev_close: Option<Decimal> = None;

        for row in &rows {
            let open = field_decimal(row.raw, OPEN_FIELDS);
            let high = field_decimal(row.raw, HIGH_FIELDS);
            let low = field_decimal(row.raw, LOW_FIELDS);
            let close = field_decimal(row.raw, CLOSE_FIELDS);

            if is_ohlc_anomaly(open, high, low, close) {
                report.ohlc_anomalies += 1;
                warn!(
                    "{} {}: OHLC logic anomaly at {} (o={:?} h={:?} l={:?} c={:?})",
                    provider, symbol, row.timestamp, open, high, low, close
                );
            }

            let volume = match field_decimal(row.raw, VOLUME_FIELDS) {
                Some(v) if v >= Decimal::ZERO => v,
                _ => {
                    report.clamped_volumes += 1;
                    Decimal::ZERO
                }
            };

            let percent_change = field_decimal(row.raw, PERCENT_CHANGE_FIELDS).or_else(|| {
                match (prev_close, close) {
                    (Some(prev), Some(cur)) if !prev.is_zero() => {
                        Some(((cur - prev) / prev * Decimal::ONE_HUNDRED).round_dp(4))
                    }
                    _ => None,
                }
            });

            if close.is_some() {
                prev_close = close;
            }

            bars.push(NormalizedBar {
                timestamp: row.timestamp,
                open,
                high,
                low,
                close,
                volume,
                percent_change,
            });
        }

        Ok((NormalizedBarSeries { bars }, report))
    }

    /// Share of null-or-zero cells for one price field, across the whole
    /// series. Fields no row carries are not recognized and not checked.
    fn check_price_field(
        &self,
        rows: &[ParsedRow<'_>],
        name: &'static str,
        aliases: &[&str],
    ) -> Option<RejectionRule> {
        let present = rows
            .iter()
            .any(|row| aliases.iter().any(|alias| row.raw.contains_key(*alias)));
        if !present {
            return None;
        }

        let bad = rows
            .iter()
            .filter(|row| {
                field_decimal(row.raw, aliases)
                    .map(|v| v.is_zero())
                    .unwrap_or(true)
            })
            .count();
        let total = rows.len();

        let limit = u64::from(self.config.max_null_or_zero_percent);
        if (bad as u64) * 100 > (total as u64) * limit {
            Some(RejectionRule::TooManyNullOrZero {
                field: name,
                bad,
                total,
            })
        } else {
            None
        }
    }

    fn reject<T>(&self, provider: &str, symbol: &str, rule: RejectionRule) -> Result<T, RejectionRule> {
        warn!("Rejected series from {} for {}: {}", provider, symbol, rule);
        Err(rule)
    }
}

impl Default for BarSeriesValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_timestamp_field(raw: &RawSeries) -> Option<&'static str> {
    TIMESTAMP_FIELDS
        .iter()
        .copied()
        .find(|field| raw.iter().any(|row| row.contains_key(*field)))
}

/// First alias present on the row, coerced to a decimal.
fn field_decimal(row: &RawRecord, aliases: &[&str]) -> Option<Decimal> {
    aliases
        .iter()
        .find_map(|alias| row.get(*alias))
        .and_then(value_to_decimal)
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(|f| Decimal::try_from(f).ok())
            }
        }
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        _ => None,
    }
}

/// Coerce a timestamp cell to UTC. Naive values are taken as UTC.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(epoch_to_utc),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
            }
            s.parse::<i64>().ok().and_then(epoch_to_utc)
        }
        _ => None,
    }
}

fn epoch_to_utc(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// High below another price, or low above another price.
fn is_ohlc_anomaly(
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
) -> bool {
    let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) else {
        return false;
    };
    high < open.max(close).max(low) || low > open.min(close).min(high)
}
