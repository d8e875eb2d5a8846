//! Capability registry: which provider serves which (data kind, category)
//! pair, and in what order.
//!
//! Registration is per role, so every entry already knows whether it
//! fetches bars or records. Failover lists are derived on demand from the
//! registered capabilities plus the runtime [`FetchOverrides`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{DataKind, InstrumentCategory, ProviderId};
use crate::provider::{BarProvider, ProviderCapabilities, RateLimit, RecordProvider};

/// Default bound on a single adapter call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime selection settings, replaced wholesale between cycles.
#[derive(Clone, Debug)]
pub struct FetchOverrides {
    /// Providers switched off by configuration.
    pub disabled: HashSet<String>,
    /// Explicit ordering per (data kind, category). Listed providers come
    /// first in list order; the rest follow by their own priority.
    pub priority_overrides: HashMap<(DataKind, InstrumentCategory), Vec<String>>,
    /// Bound on each adapter call.
    pub request_timeout: Duration,
}

impl Default for FetchOverrides {
    fn default() -> Self {
        Self {
            disabled: HashSet::new(),
            priority_overrides: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl FetchOverrides {
    pub fn is_enabled(&self, provider: &str) -> bool {
        !self.disabled.contains(provider)
    }
}

/// A registered client in one of its roles.
#[derive(Clone)]
pub enum Candidate {
    Bars(Arc<dyn BarProvider>),
    Records(Arc<dyn RecordProvider>),
}

impl Candidate {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Bars(p) => p.id(),
            Self::Records(p) => p.id(),
        }
    }

    fn priority(&self) -> u8 {
        match self {
            Self::Bars(p) => p.priority(),
            Self::Records(p) => p.priority(),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        match self {
            Self::Bars(p) => p.capabilities(),
            Self::Records(p) => p.capabilities(),
        }
    }

    fn rate_limit(&self) -> RateLimit {
        match self {
            Self::Bars(p) => p.rate_limit(),
            Self::Records(p) => p.rate_limit(),
        }
    }

    fn supports(&self, kind: DataKind, category: InstrumentCategory) -> bool {
        let role_matches = match self {
            Self::Bars(_) => kind.is_bar_series(),
            Self::Records(_) => !kind.is_bar_series(),
        };
        role_matches && self.capabilities().supports(kind, category)
    }
}

/// Static description of one registered provider.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub priority: u8,
    pub categories: Vec<InstrumentCategory>,
    pub data_kinds: Vec<DataKind>,
    pub rate_limit: RateLimit,
}

/// Registered vendor clients, immutable once the engine is built.
#[derive(Default)]
pub struct CapabilityRegistry {
    candidates: Vec<Candidate>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    pub fn all(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Ordered candidates for a (data kind, category) pair, with disabled
    /// providers removed.
    pub fn candidates(
        &self,
        kind: DataKind,
        category: InstrumentCategory,
        overrides: &FetchOverrides,
    ) -> Vec<Candidate> {
        let mut list: Vec<Candidate> = self
            .candidates
            .iter()
            .filter(|c| c.supports(kind, category) && overrides.is_enabled(c.id()))
            .cloned()
            .collect();

        let explicit = overrides.priority_overrides.get(&(kind, category));
        let rank = |c: &Candidate| -> (usize, u8, &'static str) {
            let pos = explicit
                .and_then(|order| order.iter().position(|id| id == c.id()))
                .unwrap_or(usize::MAX);
            (pos, c.priority(), c.id())
        };
        list.sort_by(|a, b| rank(a).cmp(&rank(b)));
        list
    }

    /// Provider ids of the failover list for a pair.
    pub fn failover_list(
        &self,
        kind: DataKind,
        category: InstrumentCategory,
        overrides: &FetchOverrides,
    ) -> Vec<ProviderId> {
        self.candidates(kind, category, overrides)
            .iter()
            .map(|c| ProviderId::Borrowed(c.id()))
            .collect()
    }

    pub fn describe(&self) -> Vec<ProviderDescriptor> {
        self.candidates
            .iter()
            .map(|c| {
                let caps = c.capabilities();
                ProviderDescriptor {
                    id: ProviderId::Borrowed(c.id()),
                    priority: c.priority(),
                    categories: caps.categories.to_vec(),
                    data_kinds: caps.data_kinds.to_vec(),
                    rate_limit: c.rate_limit(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MarketDataError;
    use crate::models::{BarInterval, RawRecord, RawSeries};
    use crate::provider::VendorClient;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Stub {
        id: &'static str,
        priority: u8,
        categories: &'static [InstrumentCategory],
    }

    #[async_trait]
    impl VendorClient for Stub {
        fn id(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                categories: self.categories,
                data_kinds: &[DataKind::DayBar, DataKind::Profile],
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
    impl BarProvider for Stub {
        async fn fetch_bars(
            &self,
            _symbol: &str,
            _interval: BarInterval,
            _start: Option<DateTime<Utc>>,
            _end: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> Result<Option<RawSeries>, MarketDataError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl RecordProvider for Stub {
        async fn fetch_record(
            &self,
            _kind: DataKind,
            _symbol: &str,
        ) -> Result<Option<RawRecord>, MarketDataError> {
            Ok(None)
        }
    }

    const EQ: &[InstrumentCategory] = &[InstrumentCategory::Equity];
    const EQ_CRYPTO: &[InstrumentCategory] = &[InstrumentCategory::Equity, InstrumentCategory::Crypto];

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for (id, priority, categories) in [("B", 5, EQ), ("A", 1, EQ_CRYPTO), ("C", 5, EQ)] {
            registry.register(Candidate::Bars(Arc::new(Stub {
                id,
                priority,
                categories,
            })));
        }
        registry.register(Candidate::Records(Arc::new(Stub {
            id: "PROFILES",
            priority: 1,
            categories: EQ,
        })));
        registry
    }

    #[test]
    fn test_orders_by_priority_then_id() {
        let list = registry().failover_list(
            DataKind::DayBar,
            InstrumentCategory::Equity,
            &FetchOverrides::default(),
        );
        assert_eq!(list, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_filters_by_category_and_role() {
        let registry = registry();
        let overrides = FetchOverrides::default();

        let crypto = registry.failover_list(DataKind::DayBar, InstrumentCategory::Crypto, &overrides);
        assert_eq!(crypto, vec!["A"]);

        let profiles = registry.failover_list(DataKind::Profile, InstrumentCategory::Equity, &overrides);
        assert_eq!(profiles, vec!["PROFILES"]);
    }

    #[test]
    fn test_overrides_reorder_and_disable() {
        let mut overrides = FetchOverrides::default();
        overrides.disabled.insert("B".to_string());
        overrides.priority_overrides.insert(
            (DataKind::DayBar, InstrumentCategory::Equity),
            vec!["C".to_string()],
        );

        let list = registry().failover_list(DataKind::DayBar, InstrumentCategory::Equity, &overrides);
        assert_eq!(list, vec!["C", "A"]);
    }
}
