//! QuoteHub Market Data Crate
//!
//! Provider-agnostic acquisition of market data from many competing
//! vendors, each with its own coverage, reliability and call budget.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Instrument categories: equities, ETFs, crypto, commodities, indices
//! - Bar series (daily and intraday) and single records (profile, financials, ...)
//! - Ordered failover across providers per (data kind, category) pair
//! - Per-provider rate limiting and circuit breaking
//! - Data-quality gating of every bar series before it is trusted
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   FetchRequest   |  (symbol, category, kind, range, ceiling)
//! +------------------+
//!          |
//!          v
//! +--------------------+
//! | CapabilityRegistry |  (ordered candidates, config filters)
//! +--------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |   FetchEngine    | --> | CircuitBreaker / |
//! |                  |     |   RateLimiter    |
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |  Vendor adapter  |  (BarProvider / RecordProvider)
//! +------------------+
//!          |
//!          v
//! +--------------------+
//! | BarSeriesValidator |  (accept or try the next provider)
//! +--------------------+
//! ```
//!
//! # Core Types
//!
//! - [`FetchRequest`] - One caller request
//! - [`FetchEngine`] - Drives the failover list for a request
//! - [`Fetched`] - Accepted payload with provenance and diagnostics
//! - [`NormalizedBarSeries`] - Validated, time-ordered bars
//! - [`BarProvider`] / [`RecordProvider`] - Vendor adapter roles

pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use errors::{MarketDataError, RetryClass};

pub use models::{
    AttemptOutcome, BarInterval, DataKind, DateRange, FetchPayload, FetchRequest,
    InstrumentCategory, NormalizedBar, NormalizedBarSeries, ProfileRecord, ProviderAttemptLog,
    ProviderId, RawRecord, RawSeries, Symbol, DEFAULT_ROW_LIMIT,
};

pub use provider::{
    BarProvider, ProviderCapabilities, ProviderQualitySink, RateLimit, RecordProvider,
    VendorClient,
};

pub use registry::{
    BarSeriesValidator, CircuitBreaker, CircuitBreakerConfig, CircuitState, FetchDiagnostics,
    FetchEngine, FetchOverrides, Fetched, ProviderAttempt, RateLimiter, RejectionRule,
    SkipReason, ValidationReport, DEFAULT_REQUEST_TIMEOUT,
};
