//! Asset roster entries as the engine sees them.

use serde::{Deserialize, Serialize};

use quotehub_market_data::InstrumentCategory;

/// A tradeable instrument tracked by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub category: InstrumentCategory,
    /// Streaming consumer this asset is pinned to, ahead of the default
    /// fallback order.
    #[serde(default)]
    pub preferred_consumer: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Asset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, category: InstrumentCategory) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            category,
            preferred_consumer: None,
            is_active: true,
        }
    }

    pub fn with_preferred_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.preferred_consumer = Some(consumer.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_roster_entry() {
        let asset: Asset = serde_json::from_str(
            r#"{"id":"btc","symbol":"BTC-USD","category":"CRYPTO","preferredConsumer":"COINBASE"}"#,
        )
        .unwrap();

        assert_eq!(asset.category, InstrumentCategory::Crypto);
        assert_eq!(asset.preferred_consumer.as_deref(), Some("COINBASE"));
        assert!(asset.is_active);
    }
}
