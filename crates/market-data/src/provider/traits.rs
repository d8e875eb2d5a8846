//! Vendor client trait definitions.
//!
//! One explicit trait per role: every vendor client implements
//! [`VendorClient`], and additionally [`BarProvider`] and/or
//! [`RecordProvider`] for the data it serves. Clients are registered into
//! the engine per role, so which roles a client plays is known at compile
//! time rather than discovered at runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::MarketDataError;
use crate::models::{BarInterval, DataKind, ProviderAttemptLog, RawRecord, RawSeries};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Identity and static description shared by all vendor clients.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use quotehub_market_data::provider::{ProviderCapabilities, RateLimit, VendorClient};
///
/// struct MyVendor {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl VendorClient for MyVendor {
///     fn id(&self) -> &'static str {
///         "MY_VENDOR"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             categories: &[InstrumentCategory::Equity],
///             data_kinds: &[DataKind::DayBar],
///         }
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit::per_minute(5)
///     }
///
///     async fn test_connection(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "POLYGON", "TIINGO", etc.
    /// Used for logging, rate limiting, circuit breaking and configuration.
    fn id(&self) -> &'static str;

    /// Provider priority for ordering.
    ///
    /// Lower values = higher priority. Default is 10. Configured
    /// priority lists take precedence over this value.
    fn priority(&self) -> u8 {
        10
    }

    /// Categories and data kinds this client serves.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Published per-minute call budget.
    fn rate_limit(&self) -> RateLimit;

    /// Cheap reachability check.
    async fn test_connection(&self) -> bool;
}

/// A vendor client that returns price bars.
#[async_trait]
pub trait BarProvider: VendorClient {
    /// Fetch raw bars for a symbol.
    ///
    /// Returns `Ok(None)` when the vendor does not know the symbol. Rows
    /// are passed to the validator untouched, so any field naming the
    /// validator recognizes is acceptable.
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: BarInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Option<RawSeries>, MarketDataError>;
}

/// A vendor client that returns single records (profile, financials, ...).
#[async_trait]
pub trait RecordProvider: VendorClient {
    /// Fetch one record of the given kind.
    ///
    /// Returns `Ok(None)` when the vendor has nothing for the symbol.
    async fn fetch_record(
        &self,
        kind: DataKind,
        symbol: &str,
    ) -> Result<Option<RawRecord>, MarketDataError>;
}

/// Receives one provider-quality entry per call attempt.
///
/// Implemented by the persistence layer; the engine treats write
/// failures as the sink's own concern.
#[async_trait]
pub trait ProviderQualitySink: Send + Sync {
    async fn record_attempt(&self, entry: ProviderAttemptLog);
}
