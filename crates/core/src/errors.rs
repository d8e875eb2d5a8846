//! Core error types for QuoteHub.
//!
//! Storage and vendor failures arrive here already converted: storage
//! implementations map their own errors into [`Error::Repository`], and
//! the failover engine's errors convert through `#[from]`.

use thiserror::Error;

use quotehub_market_data::MarketDataError;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Market data operation failed: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Failed to load configuration: {0}")]
    ConfigIO(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Asset '{0}' not found")]
    AssetNotFound(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidConfigValue(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_error_converts() {
        let err: Error = MarketDataError::InvalidRequest("bad range".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Market data operation failed: Invalid request: bad range"
        );
    }

    #[test]
    fn test_json_error_is_config_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::InvalidConfigValue(_)));
    }
}
