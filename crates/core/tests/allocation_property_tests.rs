//! Property-based tests for streaming allocation.
//!
//! Whatever the roster and fleet look like, no consumer is given more
//! tickers than it can hold, and outside crypto no ticker is held twice.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use quotehub_core::streaming::{allocate, reallocate, AllocationContext, ConsumerProfile};
use quotehub_core::Asset;
use quotehub_market_data::InstrumentCategory;

// =============================================================================
// Generators
// =============================================================================

fn arb_category() -> impl Strategy<Value = InstrumentCategory> {
    prop_oneof![
        Just(InstrumentCategory::Equity),
        Just(InstrumentCategory::Etf),
        Just(InstrumentCategory::Crypto),
        Just(InstrumentCategory::Index),
    ]
}

/// Fleet of up to five consumers named C0..C4.
fn arb_consumers() -> impl Strategy<Value = Vec<ConsumerProfile>> {
    prop::collection::vec(
        (
            0usize..8,
            prop::collection::vec(arb_category(), 1..4),
            0u8..5,
            prop::bool::weighted(0.9),
        ),
        1..5,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (capacity, categories, priority, enabled))| ConsumerProfile {
                id: format!("C{i}"),
                capacity,
                categories,
                priority,
                enabled,
            })
            .collect()
    })
}

/// Roster with optional pins, some of them to consumers that do not exist.
fn arb_assets() -> impl Strategy<Value = Vec<Asset>> {
    prop::collection::vec(
        (
            "[A-Z]{1,4}",
            arb_category(),
            proptest::option::weighted(0.2, 0usize..7),
        ),
        0..40,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .map(|(symbol, category, pin)| {
                let asset = Asset::new(symbol.to_lowercase(), symbol, category);
                match pin {
                    Some(n) => asset.with_preferred_consumer(format!("C{n}")),
                    None => asset,
                }
            })
            .collect()
    })
}

/// Category per symbol; the first roster entry wins, as in allocation.
fn category_of(assets: &[Asset]) -> HashMap<String, InstrumentCategory> {
    let mut categories = HashMap::new();
    for asset in assets {
        categories
            .entry(asset.symbol.clone())
            .or_insert(asset.category);
    }
    categories
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// No assignment exceeds its consumer's capacity.
    #[test]
    fn prop_capacity_is_never_exceeded(consumers in arb_consumers(), assets in arb_assets()) {
        let ctx = AllocationContext::new(consumers.clone());
        let allocation = allocate(&assets, &ctx);

        for profile in &consumers {
            let held = allocation.assignment(&profile.id).map(|a| a.len()).unwrap_or(0);
            prop_assert!(held <= profile.capacity, "{} holds {} > {}", profile.id, held, profile.capacity);
        }
    }

    /// Outside crypto, a ticker has at most one holder.
    #[test]
    fn prop_non_crypto_tickers_are_exclusive(consumers in arb_consumers(), assets in arb_assets()) {
        let ctx = AllocationContext::new(consumers);
        let allocation = allocate(&assets, &ctx);
        let categories = category_of(&assets);

        let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
        for assignment in allocation.assignments.values() {
            for symbol in assignment.tickers.keys() {
                *holders.entry(symbol.as_str()).or_default() += 1;
            }
        }
        for (symbol, count) in holders {
            if categories.get(symbol) != Some(&InstrumentCategory::Crypto) {
                prop_assert!(count <= 1, "{} held by {} consumers", symbol, count);
            }
        }
    }

    /// Disabled consumers and unsupported categories are never used.
    #[test]
    fn prop_assignments_respect_eligibility(consumers in arb_consumers(), assets in arb_assets()) {
        let ctx = AllocationContext::new(consumers.clone());
        let allocation = allocate(&assets, &ctx);

        for assignment in allocation.assignments.values() {
            let profile = consumers.iter().find(|c| c.id == assignment.consumer).unwrap();
            prop_assert!(profile.enabled);
            for category in assignment.categories() {
                prop_assert!(profile.supports(category));
            }
        }
    }

    /// Reallocation keeps the invariants and never drops what others held.
    #[test]
    fn prop_reallocation_keeps_invariants(
        consumers in arb_consumers(),
        assets in arb_assets(),
        victim in 0usize..5,
    ) {
        let ctx = AllocationContext::new(consumers.clone());
        let mut allocation = allocate(&assets, &ctx);
        let failed = format!("C{victim}");
        let before = allocation.clone();

        reallocate(&mut allocation, &failed, &ctx);

        prop_assert!(allocation.assignment(&failed).is_none());
        for profile in &consumers {
            let held = allocation.assignment(&profile.id).map(|a| a.len()).unwrap_or(0);
            prop_assert!(held <= profile.capacity);
        }
        for (id, previous) in &before.assignments {
            if *id == failed {
                continue;
            }
            let now = allocation.assignment(id).unwrap();
            for symbol in previous.tickers.keys() {
                prop_assert!(now.contains(symbol), "{} lost {}", id, symbol);
            }
        }
    }
}
