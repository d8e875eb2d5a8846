//! Environment overlay for [`EngineSettings`].
//!
//! `QH_SETTINGS_FILE` names a JSON document loaded first; individual
//! `QH_*` variables are then applied on top of it.

use std::collections::HashMap;

use chrono::NaiveDate;

use super::settings_model::EngineSettings;
use crate::constants::ENV_PREFIX;
use crate::errors::{Error, Result};

const SETTINGS_FILE: &str = "SETTINGS_FILE";
const BACKFILL_ENABLED: &str = "BACKFILL_ENABLED";
const BACKFILL_DAYS_PER_RUN: &str = "BACKFILL_DAYS_PER_RUN";
const BACKFILL_CONCURRENCY: &str = "BACKFILL_CONCURRENCY";
const MAX_HISTORICAL_DAYS: &str = "MAX_HISTORICAL_DAYS";
const MIN_HISTORICAL_DATE: &str = "MIN_HISTORICAL_DATE";
const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
const REBALANCE_INTERVAL_SECS: &str = "REBALANCE_INTERVAL_SECS";
const HEALTH_CHECK_INTERVAL_SECS: &str = "HEALTH_CHECK_INTERVAL_SECS";
const CONSUMER_TIMEOUT_SECS: &str = "CONSUMER_TIMEOUT_SECS";
const DISABLED_PROVIDERS: &str = "DISABLED_PROVIDERS";

impl EngineSettings {
    /// Load settings from the process environment, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build settings from `(name, value)` pairs. Names without the
    /// `QH_` prefix are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|name| (name.to_string(), value))
            })
            .collect();

        let mut settings = match vars.get(SETTINGS_FILE) {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| Error::ConfigIO(format!("{}: {}", path, e)))?;
                Self::from_json(&json)?
            }
            None => Self::default(),
        };

        let policy = &mut settings.backfill.policy;
        if let Some(value) = parse_var::<bool>(&vars, BACKFILL_ENABLED)? {
            policy.enabled = value;
        }
        if let Some(value) = parse_var::<i64>(&vars, BACKFILL_DAYS_PER_RUN)? {
            policy.days_per_run = value;
        }
        if let Some(value) = parse_var::<i64>(&vars, MAX_HISTORICAL_DAYS)? {
            policy.max_historical_days = value;
        }
        if let Some(value) = parse_var::<NaiveDate>(&vars, MIN_HISTORICAL_DATE)? {
            policy.min_historical_date = Some(value);
        }
        if let Some(value) = parse_var::<usize>(&vars, BACKFILL_CONCURRENCY)? {
            settings.backfill.concurrency = value;
        }
        if let Some(value) = parse_var::<u64>(&vars, REQUEST_TIMEOUT_SECS)? {
            settings.fetch.request_timeout_secs = value;
        }
        if let Some(value) = parse_var::<u64>(&vars, REBALANCE_INTERVAL_SECS)? {
            settings.streaming.rebalance_interval_secs = value;
        }
        if let Some(value) = parse_var::<u64>(&vars, HEALTH_CHECK_INTERVAL_SECS)? {
            settings.streaming.health_check_interval_secs = value;
        }
        if let Some(value) = parse_var::<u64>(&vars, CONSUMER_TIMEOUT_SECS)? {
            settings.streaming.consumer_timeout_secs = value;
        }
        if let Some(list) = vars.get(DISABLED_PROVIDERS) {
            list.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .for_each(|id| settings.set_enabled(id, false));
        }

        Ok(settings)
    }
}

fn parse_var<T: std::str::FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::InvalidConfigValue(format!("{}{}={:?}: {}", ENV_PREFIX, name, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::{plan, AssetRangeState};
    use quotehub_market_data::{BarInterval, InstrumentCategory};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_variables_gives_defaults() {
        let settings = EngineSettings::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_variables_override_defaults() {
        let settings = EngineSettings::from_vars(vars(&[
            ("QH_BACKFILL_ENABLED", "false"),
            ("QH_BACKFILL_DAYS_PER_RUN", "30"),
            ("QH_MIN_HISTORICAL_DATE", "2015-01-01"),
            ("QH_REQUEST_TIMEOUT_SECS", "5"),
            ("QH_DISABLED_PROVIDERS", "TIINGO, FMP,"),
        ]))
        .unwrap();

        assert!(!settings.backfill.policy.enabled);
        assert_eq!(settings.backfill.policy.days_per_run, 30);
        assert_eq!(
            settings.backfill.policy.min_historical_date,
            NaiveDate::from_ymd_opt(2015, 1, 1)
        );
        assert_eq!(settings.fetch.request_timeout_secs, 5);
        assert!(!settings.is_enabled("TIINGO"));
        assert!(!settings.is_enabled("FMP"));
        assert!(settings.is_enabled("POLYGON"));
    }

    #[test]
    fn test_oversized_history_depth_plans_without_panicking() {
        let settings = EngineSettings::from_vars(vars(&[
            ("QH_MAX_HISTORICAL_DAYS", "200000000"),
            ("QH_BACKFILL_DAYS_PER_RUN", "9223372036854775807"),
            ("QH_CONSUMER_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();
        let policy = settings.backfill.policy;
        let today = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();

        assert_eq!(policy.floor(today), NaiveDate::MIN);
        let state = AssetRangeState {
            asset_id: "aapl".to_string(),
            interval: BarInterval::OneDay,
            category: InstrumentCategory::Equity,
            stored: None,
            gap: None,
            earliest_available: None,
            policy,
        };
        assert!(!plan(&state, today).is_no_action());
        assert_eq!(
            settings.streaming.consumer_timeout(),
            std::time::Duration::from_secs(3)
        );
    }

    #[test]
    fn test_bad_value_names_the_variable() {
        let err = EngineSettings::from_vars(vars(&[("QH_BACKFILL_DAYS_PER_RUN", "lots")]))
            .unwrap_err();
        match err {
            Error::InvalidConfigValue(message) => {
                assert!(message.contains("QH_BACKFILL_DAYS_PER_RUN"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_settings_file_is_io_error() {
        let err = EngineSettings::from_vars(vars(&[(
            "QH_SETTINGS_FILE",
            "/nonexistent/quotehub/settings.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, Error::ConfigIO(_)));
    }
}
