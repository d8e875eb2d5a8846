//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

use crate::models::{DataKind, InstrumentCategory};

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the failover engine should handle the error.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider does not know the requested symbol.
    /// Another provider may still have it.
    #[error("Symbol not found: {symbol} ({provider})")]
    SymbolNotFound {
        /// The provider that could not find the symbol
        provider: String,
        /// The requested symbol
        symbol: String,
    },

    /// The provider answered an explicit date range with no rows.
    /// Nothing traded in that window as far as this provider knows.
    #[error("No data for {symbol} in the requested range ({provider})")]
    NoDataInRange {
        /// The provider that returned nothing
        provider: String,
        /// The requested symbol
        symbol: String,
    },

    /// The provider does not implement the requested operation.
    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported {
        /// The operation that was requested
        operation: String,
        /// The provider that rejected it
        provider: String,
    },

    /// The provider throttled the request (HTTP 429 or equivalent).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The call did not complete within the configured timeout.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// A transport or protocol error reported by the adapter.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The provider answered, but the data failed the quality gate.
    #[error("Validation failed for {provider}: {message}")]
    ValidationFailed {
        /// The provider whose data was rejected
        provider: String,
        /// The rule that rejected the data
        message: String,
    },

    /// A network error raised by an adapter's HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request itself is malformed (e.g. start after end).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No enabled provider serves this (data kind, category) pair.
    #[error("No providers available for {kind} / {category}")]
    NoProvidersAvailable {
        kind: DataKind,
        category: InstrumentCategory,
    },

    /// Every candidate was tried and every one failed.
    #[error("All providers failed after {attempts} attempt(s); last error: {last}")]
    AllProvidersFailed {
        /// Number of providers actually called
        attempts: usize,
        /// The last underlying error
        last: Box<MarketDataError>,
    },
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Never`]: Don't try other providers, the request is invalid
    /// - [`RetryClass::FailoverWithPenalty`]: Try next provider, penalise this one
    /// - [`RetryClass::NextProvider`]: Try next provider, no penalty
    ///
    /// # Examples
    ///
    /// ```
    /// use quotehub_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::Timeout { provider: "POLYGON".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::InvalidRequest("start after end".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Provider can't answer, but that says nothing about its health
            Self::SymbolNotFound { .. }
            | Self::NoDataInRange { .. }
            | Self::NotSupported { .. } => RetryClass::NextProvider,

            // Transport failures and bad data count against the provider
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::ProviderError { .. }
            | Self::ValidationFailed { .. }
            | Self::Network(_) => RetryClass::FailoverWithPenalty,

            // Nothing left to try
            Self::InvalidRequest(_)
            | Self::NoProvidersAvailable { .. }
            | Self::AllProvidersFailed { .. } => RetryClass::Never,
        }
    }

    /// Whether the provider reported the symbol as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SymbolNotFound { .. })
    }

    /// Whether the range holds no data, directly or as the last error of
    /// an exhausted failover.
    pub fn is_no_data(&self) -> bool {
        match self {
            Self::NoDataInRange { .. } => true,
            Self::AllProvidersFailed { last, .. } => last.is_no_data(),
            _ => false,
        }
    }
}
