//! Per-consumer routing predicates.
//!
//! A consumer may refuse foreign listings or a named set of tickers. The
//! same exclusion list also undoes a preferred-consumer pin: an asset
//! pinned to a consumer that excludes it goes to the default pool.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Routing restrictions for one consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingRule {
    /// Tickers this consumer must never be assigned.
    pub excluded_symbols: BTreeSet<String>,
    /// Refuse symbols listed on a foreign venue.
    pub domestic_only: bool,
}

impl RoutingRule {
    pub fn excludes(&self, symbol: &str) -> bool {
        self.excluded_symbols.contains(symbol)
    }

    pub fn allows(&self, symbol: &str) -> bool {
        !self.excludes(symbol) && !(self.domestic_only && is_foreign_listing(symbol))
    }
}

/// Routing rules for every consumer, keyed on consumer id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingRules {
    rules: BTreeMap<String, RoutingRule>,
}

impl RoutingRules {
    pub fn new(rules: BTreeMap<String, RoutingRule>) -> Self {
        Self { rules }
    }

    /// Whether `consumer` may be assigned `symbol` from the default pool.
    pub fn allows(&self, consumer: &str, symbol: &str) -> bool {
        self.rules
            .get(consumer)
            .map(|rule| rule.allows(symbol))
            .unwrap_or(true)
    }

    /// Whether a pin of `symbol` to `consumer` should be ignored.
    pub fn overrides_preference(&self, consumer: &str, symbol: &str) -> bool {
        self.rules
            .get(consumer)
            .map(|rule| rule.excludes(symbol))
            .unwrap_or(false)
    }
}

/// Venue-qualified symbols: `SHOP.TO`, `BMW.DE`, `LSE:VOD`.
///
/// A single-letter suffix is read as a share class (`BRK.B`), not a venue.
pub fn is_foreign_listing(symbol: &str) -> bool {
    if symbol.contains(':') {
        return true;
    }
    match symbol.rsplit_once('.') {
        Some((base, suffix)) => {
            !base.is_empty()
                && suffix.len() >= 2
                && suffix.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}
