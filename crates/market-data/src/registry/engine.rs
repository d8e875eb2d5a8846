//! Fetch failover engine.
//!
//! Drives the ordered provider list for one request:
//! - Skip providers whose circuit is open
//! - Wait for a rate-limiter slot
//! - Call the adapter under the request timeout
//! - Validate what came back
//! - On failure, act on the error's [`RetryClass`]
//!
//! Providers are tried strictly in order, never raced; the first accepted
//! result wins and carries the provider that produced it.

use std::borrow::Cow;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::time::Instant;

use super::capability_registry::{Candidate, CapabilityRegistry, FetchOverrides, ProviderDescriptor};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::rate_limiter::RateLimiter;
use super::skip_reason::{FetchDiagnostics, SkipReason};
use super::validator::BarSeriesValidator;
use crate::errors::{MarketDataError, RetryClass};
use crate::models::{
    AttemptOutcome, DataKind, FetchPayload, FetchRequest, InstrumentCategory, NormalizedBarSeries,
    ProfileRecord, ProviderAttemptLog, ProviderId,
};
use crate::provider::{BarProvider, ProviderQualitySink, RecordProvider};

/// A successful fetch with its provenance.
#[derive(Clone, Debug)]
pub struct Fetched {
    /// Provider whose data was accepted.
    pub provider: ProviderId,
    pub payload: FetchPayload,
    pub diagnostics: FetchDiagnostics,
    pub fetched_at: DateTime<Utc>,
}

/// Multi-provider fetch engine.
///
/// Owns the per-provider rate-limiter logs and circuit state; nothing
/// else is retained across requests.
pub struct FetchEngine {
    registry: CapabilityRegistry,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    validator: BarSeriesValidator,
    overrides: RwLock<FetchOverrides>,
    quality_sink: Option<Arc<dyn ProviderQualitySink>>,
}

impl FetchEngine {
    pub fn new() -> Self {
        Self::with_circuit_breaker(CircuitBreakerConfig::default())
    }

    pub fn with_circuit_breaker(config: CircuitBreakerConfig) -> Self {
        Self {
            registry: CapabilityRegistry::new(),
            rate_limiter: RateLimiter::new(),
            circuit_breaker: CircuitBreaker::with_config(config),
            validator: BarSeriesValidator::new(),
            overrides: RwLock::new(FetchOverrides::default()),
            quality_sink: None,
        }
    }

    pub fn with_validator(mut self, validator: BarSeriesValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_quality_sink(mut self, sink: Arc<dyn ProviderQualitySink>) -> Self {
        self.quality_sink = Some(sink);
        self
    }

    /// Register a bar-fetching client and configure its call budget.
    pub fn register_bar_provider(&mut self, provider: Arc<dyn BarProvider>) {
        let id: ProviderId = Cow::Borrowed(provider.id());
        self.rate_limiter
            .configure(&id, provider.rate_limit().requests_per_minute);
        info!("Registered bar provider '{}'", id);
        self.registry.register(Candidate::Bars(provider));
    }

    /// Register a record-fetching client and configure its call budget.
    pub fn register_record_provider(&mut self, provider: Arc<dyn RecordProvider>) {
        let id: ProviderId = Cow::Borrowed(provider.id());
        self.rate_limiter
            .configure(&id, provider.rate_limit().requests_per_minute);
        info!("Registered record provider '{}'", id);
        self.registry.register(Candidate::Records(provider));
    }

    fn read_overrides(&self) -> RwLockReadGuard<'_, FetchOverrides> {
        self.overrides.read().unwrap_or_else(|poisoned| {
            warn!("Fetch overrides lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_overrides(&self) -> RwLockWriteGuard<'_, FetchOverrides> {
        self.overrides.write().unwrap_or_else(|poisoned| {
            warn!("Fetch overrides lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Replace the runtime selection settings. Takes effect on the next fetch.
    pub fn set_overrides(&self, overrides: FetchOverrides) {
        *self.write_overrides() = overrides;
    }

    pub fn overrides(&self) -> FetchOverrides {
        self.read_overrides().clone()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.describe()
    }

    /// Current failover list for a pair, after configuration filters.
    pub fn failover_list(&self, kind: DataKind, category: InstrumentCategory) -> Vec<ProviderId> {
        self.registry
            .failover_list(kind, category, &self.read_overrides())
    }

    /// Fetch data for one request, falling back through the provider list.
    ///
    /// Returns [`MarketDataError::AllProvidersFailed`] carrying the last
    /// underlying error when every called provider failed, and
    /// [`MarketDataError::NoProvidersAvailable`] when no provider could be
    /// called at all.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, MarketDataError> {
        if let Some(range) = &request.range {
            if !range.is_valid() {
                return Err(MarketDataError::InvalidRequest(format!(
                    "start {} is after end {}",
                    range.start, range.end
                )));
            }
        }
        if request.limit == 0 {
            return Err(MarketDataError::InvalidRequest(
                "row limit must be positive".to_string(),
            ));
        }

        let overrides = self.overrides();
        let mut candidates = self
            .registry
            .candidates(request.kind, request.category, &overrides);

        if let Some(preferred) = &request.preferred_provider {
            match candidates.iter().position(|c| c.id() == preferred.as_ref()) {
                Some(pos) => {
                    let candidate = candidates.remove(pos);
                    candidates.insert(0, candidate);
                }
                None => debug!(
                    "Preferred provider '{}' does not serve {} / {}, ignoring",
                    preferred, request.kind, request.category
                ),
            }
        }

        if candidates.is_empty() {
            warn!(
                "No providers available for {} / {} ({})",
                request.kind, request.category, request.symbol
            );
            return Err(MarketDataError::NoProvidersAvailable {
                kind: request.kind,
                category: request.category,
            });
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error: Option<MarketDataError> = None;
        let mut attempts = 0usize;

        for candidate in candidates {
            let provider_id: ProviderId = Cow::Borrowed(candidate.id());

            if !self.circuit_breaker.is_allowed(&provider_id) {
                debug!(
                    "Circuit breaker open for provider '{}', skipping",
                    provider_id
                );
                diagnostics.record_skip(provider_id, SkipReason::CircuitBreakerOpen);
                continue;
            }

            self.rate_limiter.acquire(&provider_id).await;
            attempts += 1;

            let started = Instant::now();
            let result = self
                .call(&candidate, request, overrides.request_timeout)
                .await;
            let latency = started.elapsed();

            match result {
                Ok(payload) => {
                    self.circuit_breaker.record_success(&provider_id);
                    let rows = match &payload {
                        FetchPayload::Bars(series) => series.len(),
                        FetchPayload::Record(_) => 1,
                    };
                    self.record_attempt(
                        &provider_id,
                        request,
                        AttemptOutcome::Success { rows },
                        latency,
                    )
                    .await;
                    diagnostics.record_success(provider_id.clone());

                    debug!(
                        "Fetched {} row(s) of {} for {} from '{}' in {:?}",
                        rows, request.kind, request.symbol, provider_id, latency
                    );
                    return Ok(Fetched {
                        provider: provider_id,
                        payload,
                        diagnostics,
                        fetched_at: Utc::now(),
                    });
                }
                Err(e) => {
                    let outcome = match &e {
                        MarketDataError::SymbolNotFound { .. } => AttemptOutcome::NotFound,
                        MarketDataError::NoDataInRange { .. } => AttemptOutcome::NoData,
                        MarketDataError::ValidationFailed { message, .. } => {
                            AttemptOutcome::Rejected(message.clone())
                        }
                        other => AttemptOutcome::Failed(other.to_string()),
                    };
                    self.record_attempt(&provider_id, request, outcome, latency)
                        .await;
                    diagnostics.record_error(provider_id.clone(), e.to_string());

                    // The request already passed the checks above, so a
                    // terminal class from an adapter is held against it.
                    let class = match e.retry_class() {
                        RetryClass::Never => RetryClass::FailoverWithPenalty,
                        class => class,
                    };
                    match class {
                        RetryClass::FailoverWithPenalty => {
                            self.circuit_breaker.record_failure(&provider_id);
                            warn!(
                                "Provider '{}' failed for {} ({}): {}, trying next provider",
                                provider_id, request.symbol, request.kind, e
                            );
                        }
                        RetryClass::NextProvider | RetryClass::Never => {
                            debug!(
                                "Provider '{}' has nothing for {} ({}): {}, trying next provider",
                                provider_id, request.symbol, request.kind, e
                            );
                        }
                    }

                    last_error = Some(e);
                }
            }
        }

        warn!(
            "All providers failed for {} ({} / {}): {}",
            request.symbol,
            request.kind,
            request.category,
            diagnostics.summary()
        );

        match last_error {
            Some(last) => Err(MarketDataError::AllProvidersFailed {
                attempts,
                last: Box::new(last),
            }),
            None => Err(MarketDataError::NoProvidersAvailable {
                kind: request.kind,
                category: request.category,
            }),
        }
    }

    /// Fetch a bar series, discarding the record variant.
    pub async fn fetch_bars(
        &self,
        request: &FetchRequest,
    ) -> Result<(ProviderId, NormalizedBarSeries), MarketDataError> {
        if !request.kind.is_bar_series() {
            return Err(MarketDataError::InvalidRequest(format!(
                "{} is not a bar series",
                request.kind
            )));
        }
        let fetched = self.fetch(request).await?;
        let provider = fetched.provider;
        fetched
            .payload
            .into_bars()
            .map(|series| (provider, series))
            .ok_or_else(|| MarketDataError::InvalidRequest("expected a bar series".to_string()))
    }

    /// Check reachability of every registered provider.
    pub async fn test_connections(&self) -> Vec<(ProviderId, bool)> {
        let mut results = Vec::new();
        for candidate in self.registry.all() {
            let ok = match candidate {
                Candidate::Bars(p) => p.test_connection().await,
                Candidate::Records(p) => p.test_connection().await,
            };
            results.push((Cow::Borrowed(candidate.id()), ok));
        }
        results
    }

    async fn call(
        &self,
        candidate: &Candidate,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<FetchPayload, MarketDataError> {
        let provider = candidate.id();
        let elapsed = || MarketDataError::Timeout {
            provider: provider.to_string(),
        };
        let not_found = || MarketDataError::SymbolNotFound {
            provider: provider.to_string(),
            symbol: request.symbol.to_string(),
        };

        match candidate {
            Candidate::Bars(client) => {
                let (start, end) = match request.range {
                    Some(range) => (Some(range.start), Some(range.end)),
                    None => (None, None),
                };
                let raw = tokio::time::timeout(
                    timeout,
                    client.fetch_bars(&request.symbol, request.interval, start, end, request.limit),
                )
                .await
                .map_err(|_| elapsed())??
                .ok_or_else(not_found)?;

                // An empty answer to an explicit window is a fact about the
                // window, not a fault of the provider.
                if raw.is_empty() && request.range.is_some() {
                    return Err(MarketDataError::NoDataInRange {
                        provider: provider.to_string(),
                        symbol: request.symbol.to_string(),
                    });
                }

                let mut series = self.validator.validate(&raw, provider, &request.symbol)?;
                series.truncate_to_latest(request.limit);
                Ok(FetchPayload::Bars(series))
            }
            Candidate::Records(client) => {
                let fields = tokio::time::timeout(timeout, client.fetch_record(request.kind, &request.symbol))
                    .await
                    .map_err(|_| elapsed())??
                    .ok_or_else(not_found)?;

                if fields.is_empty() {
                    return Err(MarketDataError::ValidationFailed {
                        provider: provider.to_string(),
                        message: format!("{}: empty record", request.symbol),
                    });
                }
                Ok(FetchPayload::Record(ProfileRecord { fields }))
            }
        }
    }

    async fn record_attempt(
        &self,
        provider: &ProviderId,
        request: &FetchRequest,
        outcome: AttemptOutcome,
        latency: Duration,
    ) {
        if let Some(sink) = &self.quality_sink {
            sink.record_attempt(ProviderAttemptLog {
                provider: provider.clone(),
                symbol: request.symbol.clone(),
                kind: request.kind,
                outcome,
                latency,
                attempted_at: Utc::now(),
            })
            .await;
        }
    }
}

impl Default for FetchEngine {
    fn default() -> Self {
        Self::new()
    }
}
