//! Engine settings document.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a working configuration.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quotehub_market_data::{
    BarInterval, DataKind, FetchOverrides, InstrumentCategory, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_ROW_LIMIT,
};

use crate::backfill::BackfillPolicy;
use crate::constants::{
    DEFAULT_BACKFILL_CONCURRENCY, DEFAULT_CONSUMER_CALL_TIMEOUT_SECS,
    DEFAULT_FAILURE_COOL_DOWN_SECS, DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
    DEFAULT_REBALANCE_INTERVAL_SECS,
};
use crate::errors::Result;
use crate::streaming::{RoutingRule, RoutingRules};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub enabled: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackfillSettings {
    #[serde(flatten)]
    pub policy: BackfillPolicy,
    /// (asset, interval) pairs processed at once.
    pub concurrency: usize,
    /// Intervals kept for every asset.
    pub intervals: Vec<BarInterval>,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            policy: BackfillPolicy::default(),
            concurrency: DEFAULT_BACKFILL_CONCURRENCY,
            intervals: vec![BarInterval::OneDay],
        }
    }
}

/// Explicit provider order for one (data kind, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityOverride {
    pub kind: DataKind,
    pub category: InstrumentCategory,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    pub request_timeout_secs: u64,
    pub priority_overrides: Vec<PriorityOverride>,
    /// Upper bound on rows requested in one call.
    pub max_rows_per_request: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            priority_overrides: Vec::new(),
            max_rows_per_request: DEFAULT_ROW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    pub rebalance_interval_secs: u64,
    pub health_check_interval_secs: u64,
    /// How long a failed consumer is left out of allocation.
    pub failure_cool_down_secs: u64,
    /// Bound on each health check, subscribe and disconnect call.
    pub consumer_timeout_secs: u64,
    /// Ordered consumer ids per category. Categories without a list fall
    /// back to every capable consumer by priority.
    pub fallback: BTreeMap<InstrumentCategory, Vec<String>>,
    pub routing: BTreeMap<String, RoutingRule>,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            rebalance_interval_secs: DEFAULT_REBALANCE_INTERVAL_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            failure_cool_down_secs: DEFAULT_FAILURE_COOL_DOWN_SECS,
            consumer_timeout_secs: DEFAULT_CONSUMER_CALL_TIMEOUT_SECS,
            fallback: BTreeMap::new(),
            routing: BTreeMap::new(),
        }
    }
}

impl StreamingSettings {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn failure_cool_down(&self) -> Duration {
        Duration::from_secs(self.failure_cool_down_secs)
    }

    pub fn consumer_timeout(&self) -> Duration {
        Duration::from_secs(self.consumer_timeout_secs.max(1))
    }

    pub fn routing_rules(&self) -> RoutingRules {
        RoutingRules::new(self.routing.clone())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Per-vendor switches, covering both REST providers and streaming
    /// consumers. Vendors not listed are enabled.
    pub providers: BTreeMap<String, ProviderSettings>,
    pub backfill: BackfillSettings,
    pub fetch: FetchSettings,
    pub streaming: StreamingSettings,
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_enabled(&self, vendor: &str) -> bool {
        self.providers
            .get(vendor)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    pub fn set_enabled(&mut self, vendor: &str, enabled: bool) {
        self.providers
            .entry(vendor.to_string())
            .or_default()
            .enabled = enabled;
    }

    /// Selection settings for the failover engine.
    pub fn fetch_overrides(&self) -> FetchOverrides {
        let disabled = self
            .providers
            .iter()
            .filter(|(_, p)| !p.enabled)
            .map(|(id, _)| id.clone())
            .collect();

        let mut priority_overrides = HashMap::new();
        for entry in &self.fetch.priority_overrides {
            priority_overrides.insert((entry.kind, entry.category), entry.providers.clone());
        }

        FetchOverrides {
            disabled,
            priority_overrides,
            request_timeout: Duration::from_secs(self.fetch.request_timeout_secs.max(1)),
        }
    }
}
