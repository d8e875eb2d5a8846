//! Provider capabilities and rate limiting configuration.
//!
//! This module defines structures for describing what a vendor client
//! can do and how it should be rate-limited.

use crate::models::{DataKind, InstrumentCategory};

/// Describes the capabilities of a vendor client.
///
/// Used by the capability registry to place the client into the
/// failover list of every (data kind, category) pair it can serve.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Instrument categories this provider covers.
    pub categories: &'static [InstrumentCategory],

    /// Data kinds this provider answers.
    pub data_kinds: &'static [DataKind],
}

impl ProviderCapabilities {
    pub fn supports(&self, kind: DataKind, category: InstrumentCategory) -> bool {
        self.data_kinds.contains(&kind) && self.categories.contains(&category)
    }
}

/// Published call budget for a provider.
///
/// Providers without a published limit (`requests_per_minute: None`) are
/// never throttled locally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum calls allowed in any rolling 60-second window.
    pub requests_per_minute: Option<u32>,
}

impl RateLimit {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: Some(requests_per_minute),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            requests_per_minute: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_requires_kind_and_category() {
        let caps = ProviderCapabilities {
            categories: &[InstrumentCategory::Equity, InstrumentCategory::Etf],
            data_kinds: &[DataKind::DayBar, DataKind::Profile],
        };

        assert!(caps.supports(DataKind::DayBar, InstrumentCategory::Etf));
        assert!(!caps.supports(DataKind::DayBar, InstrumentCategory::Crypto));
        assert!(!caps.supports(DataKind::IntradayBar, InstrumentCategory::Equity));
    }
}
