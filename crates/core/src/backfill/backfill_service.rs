//! Backfill service.
//!
//! Runs one planning cycle over the active roster:
//!
//! ```text
//! BackfillService::run_cycle
//!       │
//!       ├─► SettingsHandle (snapshot, pushes FetchOverrides to the engine)
//!       ├─► AssetRepositoryTrait (active roster)
//!       └─► per (asset, interval), bounded concurrency
//!             ├─► MarketDataStore::get_range_state / find_gap
//!             ├─► planner::plan
//!             ├─► FetchEngine::fetch_bars
//!             ├─► MarketDataStore::upsert_bars
//!             └─► MarketDataStore::mark_history_start (backward fill came back empty)
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use quotehub_market_data::{BarInterval, FetchEngine, FetchRequest};

use super::backfill_model::{
    AssetBackfillResult, AssetRangeState, BackfillCycleReport, BackfillOutcome, FetchPlan,
    FetchWindow, PlanReason,
};
use super::backfill_traits::MarketDataStore;
use super::planner::plan;
use crate::assets::{Asset, AssetRepositoryTrait};
use crate::errors::Result;
use crate::settings::{EngineSettings, SettingsHandle};

pub struct BackfillService {
    engine: Arc<FetchEngine>,
    store: Arc<dyn MarketDataStore>,
    assets: Arc<dyn AssetRepositoryTrait>,
    settings: SettingsHandle,
}

impl BackfillService {
    pub fn new(
        engine: Arc<FetchEngine>,
        store: Arc<dyn MarketDataStore>,
        assets: Arc<dyn AssetRepositoryTrait>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            engine,
            store,
            assets,
            settings,
        }
    }

    /// Plan and execute one cycle for every active asset and configured
    /// interval, as of the current UTC date.
    pub async fn run_cycle(&self) -> Result<BackfillCycleReport> {
        self.run_cycle_at(Utc::now().date_naive()).await
    }

    /// Same as [`run_cycle`](Self::run_cycle) with an explicit "today".
    ///
    /// Only reading the roster can fail the cycle; per-asset failures are
    /// reported in the returned [`BackfillCycleReport`].
    pub async fn run_cycle_at(&self, today: NaiveDate) -> Result<BackfillCycleReport> {
        let settings = self.settings.snapshot();
        self.engine.set_overrides(settings.fetch_overrides());

        let assets = self.assets.list_active()?;
        let mut intervals = settings.backfill.intervals.clone();
        if intervals.is_empty() {
            intervals.push(BarInterval::OneDay);
        }

        let work: Vec<(Asset, BarInterval)> = assets
            .into_iter()
            .filter(|asset| asset.is_active)
            .flat_map(|asset| intervals.iter().map(move |i| (asset.clone(), *i)))
            .collect();

        if work.is_empty() {
            debug!("Backfill cycle: no active assets");
            return Ok(BackfillCycleReport::default());
        }

        debug!("Backfill cycle over {} (asset, interval) pairs", work.len());

        let concurrency = settings.backfill.concurrency.max(1);
        let settings = &settings;
        let results: Vec<AssetBackfillResult> = stream::iter(work)
            .map(|(asset, interval)| async move {
                self.process(&asset, interval, today, settings).await
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = BackfillCycleReport::default();
        for result in results {
            report.add_result(result);
        }

        if report.is_success() {
            info!("Backfill cycle complete: {}", report.summary());
        } else {
            warn!("Backfill cycle complete with failures: {}", report.summary());
        }
        Ok(report)
    }

    async fn process(
        &self,
        asset: &Asset,
        interval: BarInterval,
        today: NaiveDate,
        settings: &EngineSettings,
    ) -> AssetBackfillResult {
        let outcome = match self.execute(asset, interval, today, settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Backfill failed for {} ({}): {}", asset.symbol, interval, e);
                BackfillOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        AssetBackfillResult {
            asset_id: asset.id.clone(),
            interval,
            outcome,
        }
    }

    async fn execute(
        &self,
        asset: &Asset,
        interval: BarInterval,
        today: NaiveDate,
        settings: &EngineSettings,
    ) -> Result<BackfillOutcome> {
        let state = self.load_state(asset, interval, today, settings)?;

        let window = match plan(&state, today) {
            FetchPlan::NoAction => {
                debug!("{} ({}): history satisfies policy", asset.symbol, interval);
                return Ok(BackfillOutcome::NoAction);
            }
            FetchPlan::Fetch(window) => window,
        };

        debug!(
            "{} ({}): fetching {} to {} ({:?}, limit {})",
            asset.symbol, interval, window.start, window.end, window.reason, window.limit
        );

        let request = build_request(asset, interval, &window, settings);
        let (provider, series) = match self.engine.fetch_bars(&request).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_no_data() && window.reason == PlanReason::BackwardFill => {
                let Some(starts) = state.stored.map(|range| range.oldest) else {
                    return Err(e.into());
                };
                self.store.mark_history_start(&asset.id, interval, starts)?;
                info!(
                    "{} ({}): no data before {}, history starts there",
                    asset.symbol, interval, starts
                );
                return Ok(BackfillOutcome::HistoryStart { window, starts });
            }
            Err(e) => return Err(e.into()),
        };
        let rows = self
            .store
            .upsert_bars(&asset.id, interval, series.bars())
            .await?;

        debug!(
            "{} ({}): stored {} rows from {}",
            asset.symbol, interval, rows, provider
        );

        Ok(BackfillOutcome::Fetched {
            provider: provider.into_owned(),
            window,
            rows,
        })
    }

    fn load_state(
        &self,
        asset: &Asset,
        interval: BarInterval,
        today: NaiveDate,
        settings: &EngineSettings,
    ) -> Result<AssetRangeState> {
        let policy = settings.backfill.policy.clone();
        let stored = self.store.get_range_state(&asset.id, interval)?;
        let earliest_available = self.store.history_start(&asset.id, interval)?;

        let gap = match stored {
            Some(range) if policy.enabled => {
                let start = range.oldest.max(policy.floor(today));
                self.store.find_gap(&asset.id, interval, start, range.newest)?
            }
            _ => None,
        };

        Ok(AssetRangeState {
            asset_id: asset.id.clone(),
            interval,
            category: asset.category,
            stored,
            gap,
            earliest_available,
            policy,
        })
    }
}

fn build_request(
    asset: &Asset,
    interval: BarInterval,
    window: &FetchWindow,
    settings: &EngineSettings,
) -> FetchRequest {
    let start = Utc.from_utc_datetime(&window.start.and_time(NaiveTime::MIN));
    let end = Utc.from_utc_datetime(
        &window
            .end
            .and_hms_opt(23, 59, 59)
            .unwrap_or_else(|| window.end.and_time(NaiveTime::MIN)),
    );
    let limit = window.limit.min(settings.fetch.max_rows_per_request.max(1));

    FetchRequest::bars(asset.symbol.clone(), asset.category, interval)
        .with_range(start, end)
        .with_limit(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::{DateGap, StoredRange};
    use crate::errors::Error;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::borrow::Cow;
    use quotehub_market_data::{
        BarProvider, DataKind, InstrumentCategory, MarketDataError, NormalizedBar,
        ProviderCapabilities, RateLimit, RawRecord, RawSeries, VendorClient,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        ranges: Mutex<HashMap<String, StoredRange>>,
        starts: Mutex<HashMap<String, NaiveDate>>,
        written: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl MarketDataStore for MemoryStore {
        fn get_range_state(
            &self,
            asset_id: &str,
            _interval: BarInterval,
        ) -> Result<Option<StoredRange>> {
            if asset_id == "broken" {
                return Err(Error::Repository("disk on fire".to_string()));
            }
            Ok(self.ranges.lock().unwrap().get(asset_id).copied())
        }

        fn find_gap(
            &self,
            _asset_id: &str,
            _interval: BarInterval,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Option<DateGap>> {
            Ok(None)
        }

        fn history_start(
            &self,
            asset_id: &str,
            _interval: BarInterval,
        ) -> Result<Option<NaiveDate>> {
            Ok(self.starts.lock().unwrap().get(asset_id).copied())
        }

        fn mark_history_start(
            &self,
            asset_id: &str,
            _interval: BarInterval,
            date: NaiveDate,
        ) -> Result<()> {
            self.starts
                .lock()
                .unwrap()
                .insert(asset_id.to_string(), date);
            Ok(())
        }

        async fn upsert_bars(
            &self,
            asset_id: &str,
            _interval: BarInterval,
            bars: &[NormalizedBar],
        ) -> Result<usize> {
            self.written
                .lock()
                .unwrap()
                .push((asset_id.to_string(), bars.len()));
            Ok(bars.len())
        }
    }

    struct Roster(Vec<Asset>);

    impl AssetRepositoryTrait for Roster {
        fn list_active(&self) -> Result<Vec<Asset>> {
            Ok(self.0.clone())
        }
    }

    /// Returns one bar per calendar day in the requested range, from the
    /// listing date on.
    #[derive(Default)]
    struct DailyVendor {
        listed: Option<NaiveDate>,
        requests: Mutex<Vec<(String, Option<DateTime<Utc>>, usize)>>,
    }

    #[async_trait]
    impl VendorClient for DailyVendor {
        fn id(&self) -> &'static str {
            "DAILY"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                categories: &[InstrumentCategory::Equity],
                data_kinds: &[DataKind::DayBar],
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit::unlimited()
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl BarProvider for DailyVendor {
        async fn fetch_bars(
            &self,
            symbol: &str,
            _interval: BarInterval,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
            limit: usize,
        ) -> std::result::Result<Option<RawSeries>, MarketDataError> {
            self.requests
                .lock()
                .unwrap()
                .push((symbol.to_string(), start, limit));
            if symbol == "GONE" {
                return Ok(None);
            }
            let (Some(start), Some(end)) = (start, end) else {
                return Ok(Some(Vec::new()));
            };
            let mut rows = Vec::new();
            let mut day = start.date_naive().max(self.listed.unwrap_or(NaiveDate::MIN));
            while day <= end.date_naive() {
                if let serde_json::Value::Object(map) = json!({
                    "date": day.to_string(),
                    "open": 10.0, "high": 11.0, "low": 9.0, "close": 10.5, "volume": 1000,
                }) {
                    rows.push(map);
                } else {
                    rows.push(RawRecord::new());
                }
                day += Duration::days(1);
            }
            Ok(Some(rows))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service(
        assets: Vec<Asset>,
        store: Arc<MemoryStore>,
        settings: EngineSettings,
    ) -> (BackfillService, Arc<DailyVendor>) {
        let vendor = Arc::new(DailyVendor::default());
        let (service, _engine) = service_with(assets, store, settings, vendor.clone());
        (service, vendor)
    }

    fn service_with(
        assets: Vec<Asset>,
        store: Arc<MemoryStore>,
        settings: EngineSettings,
        vendor: Arc<DailyVendor>,
    ) -> (BackfillService, Arc<FetchEngine>) {
        let mut engine = FetchEngine::new();
        engine.register_bar_provider(vendor);
        let engine = Arc::new(engine);
        let service = BackfillService::new(
            engine.clone(),
            store,
            Arc::new(Roster(assets)),
            SettingsHandle::new(settings),
        );
        (service, engine)
    }

    fn settings(days_per_run: i64) -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.backfill.policy.days_per_run = days_per_run;
        settings.backfill.policy.max_historical_days = 365;
        settings
    }

    #[tokio::test]
    async fn test_new_asset_gets_initial_window() {
        let store = Arc::new(MemoryStore::default());
        let (service, vendor) = service(
            vec![Asset::new("aapl", "AAPL", InstrumentCategory::Equity)],
            store.clone(),
            settings(10),
        );

        let report = service.run_cycle_at(date(2024, 6, 12)).await.unwrap();

        assert_eq!(report.planned, 1);
        assert_eq!(report.fetched_rows, 10);
        assert!(report.is_success());
        assert_eq!(
            *store.written.lock().unwrap(),
            vec![("aapl".to_string(), 10)]
        );

        let requests = vendor.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "AAPL");
        assert_eq!(
            requests[0].1.map(|t| t.date_naive()),
            Some(date(2024, 6, 3))
        );
        assert_eq!(requests[0].2, 10);
    }

    #[tokio::test]
    async fn test_satisfied_asset_makes_no_call() {
        let store = Arc::new(MemoryStore::default());
        let today = date(2024, 6, 12);
        store.ranges.lock().unwrap().insert(
            "aapl".to_string(),
            StoredRange {
                oldest: today - Duration::days(365),
                newest: today,
                row_count: 262,
            },
        );
        let (service, vendor) = service(
            vec![Asset::new("aapl", "AAPL", InstrumentCategory::Equity)],
            store,
            settings(30),
        );

        let report = service.run_cycle_at(today).await.unwrap();

        assert_eq!(report.no_action, 1);
        assert_eq!(report.planned, 0);
        assert!(vendor.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_young_asset_records_history_start_and_settles() {
        let today = date(2024, 6, 12);
        let listed = date(2024, 1, 2);
        let store = Arc::new(MemoryStore::default());
        store.ranges.lock().unwrap().insert(
            "newco".to_string(),
            StoredRange {
                oldest: listed,
                newest: today,
                row_count: 115,
            },
        );
        let vendor = Arc::new(DailyVendor {
            listed: Some(listed),
            ..Default::default()
        });
        let (service, engine) = service_with(
            vec![Asset::new("newco", "NEWCO", InstrumentCategory::Equity)],
            store.clone(),
            EngineSettings::default(),
            vendor.clone(),
        );

        let report = service.run_cycle_at(today).await.unwrap();
        assert_eq!(report.planned, 1);
        assert_eq!(report.history_starts, 1);
        assert!(report.is_success());
        assert_eq!(store.starts.lock().unwrap().get("newco"), Some(&listed));

        for _ in 0..6 {
            let report = service.run_cycle_at(today).await.unwrap();
            assert_eq!(report.no_action, 1);
            assert_eq!(report.planned, 0);
        }

        // One empty backward request in total, and the provider is unharmed.
        assert_eq!(vendor.requests.lock().unwrap().len(), 1);
        let id = Cow::Borrowed("DAILY");
        assert_eq!(engine.circuit_breaker().failure_count(&id), 0);
        assert!(engine.circuit_breaker().is_allowed(&id));
    }

    #[tokio::test]
    async fn test_failures_are_per_asset() {
        let store = Arc::new(MemoryStore::default());
        let (service, _vendor) = service(
            vec![
                Asset::new("aapl", "AAPL", InstrumentCategory::Equity),
                Asset::new("gone", "GONE", InstrumentCategory::Equity),
                Asset::new("broken", "BRKN", InstrumentCategory::Equity),
            ],
            store,
            settings(5),
        );

        let report = service.run_cycle_at(date(2024, 6, 12)).await.unwrap();

        assert_eq!(report.planned, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.fetched_rows, 5);
        let mut failed: Vec<&str> = report.failures.iter().map(|(id, _)| id.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["broken", "gone"]);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_the_asset() {
        let store = Arc::new(MemoryStore::default());
        let mut config = settings(5);
        config.set_enabled("DAILY", false);
        let (service, vendor) = service(
            vec![Asset::new("aapl", "AAPL", InstrumentCategory::Equity)],
            store,
            config,
        );

        let report = service.run_cycle_at(date(2024, 6, 12)).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(vendor.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_covers_whole_days_and_caps_rows() {
        let asset = Asset::new("aapl", "AAPL", InstrumentCategory::Equity);
        let window = FetchWindow {
            start: date(2024, 1, 1),
            end: date(2024, 1, 31),
            limit: 10_000,
            is_backfill: true,
            reason: PlanReason::BackwardFill,
        };
        let mut config = EngineSettings::default();
        config.fetch.max_rows_per_request = 500;

        let request = build_request(&asset, BarInterval::OneDay, &window, &config);
        let range = request.range.unwrap();
        assert_eq!(range.start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(range.end.to_rfc3339(), "2024-01-31T23:59:59+00:00");
        assert_eq!(request.limit, 500);
    }
}
