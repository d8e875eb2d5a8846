//! Ticker-to-consumer allocation.
//!
//! Pure functions over the roster and a snapshot of the consumer fleet.
//! The orchestrator recomputes an [`Allocation`] wholesale on every
//! rebalance and patches it with [`reallocate`] when one consumer fails.
//!
//! Order of work in [`allocate`]:
//!
//! 1. Pinned assets go to their preferred consumer, bounded by capacity.
//!    A pin to an absent, disabled or incapable consumer (or one whose
//!    routing rule excludes the symbol) is dropped with a warning and the
//!    asset joins the default pool.
//! 2. Default assets outside crypto walk the category's fallback order and
//!    land on the first consumer with room that routing allows.
//! 3. Default crypto assets are replicated to every eligible consumer, each
//!    bounded by its own capacity.
//!
//! Invariant: no assignment ever holds more tickers than its consumer's
//! capacity, and outside crypto a ticker is held by at most one consumer.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, warn};

use quotehub_market_data::InstrumentCategory;

use super::consumer::StreamConsumer;
use super::rules::RoutingRules;
use crate::assets::Asset;

/// Allocation-time view of one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerProfile {
    pub id: String,
    pub capacity: usize,
    pub categories: Vec<InstrumentCategory>,
    pub priority: u8,
    pub enabled: bool,
}

impl ConsumerProfile {
    pub fn of(consumer: &dyn StreamConsumer, enabled: bool) -> Self {
        Self {
            id: consumer.id().to_string(),
            capacity: consumer.max_subscriptions(),
            categories: consumer.categories().to_vec(),
            priority: consumer.priority(),
            enabled,
        }
    }

    pub fn supports(&self, category: InstrumentCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Tickers held by one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub consumer: String,
    pub tickers: BTreeMap<String, InstrumentCategory>,
    pub priority: u8,
}

impl Assignment {
    fn new(profile: &ConsumerProfile) -> Self {
        Self {
            consumer: profile.id.clone(),
            tickers: BTreeMap::new(),
            priority: profile.priority,
        }
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.tickers.contains_key(symbol)
    }

    /// Categories served by this assignment.
    pub fn categories(&self) -> BTreeSet<InstrumentCategory> {
        self.tickers.values().copied().collect()
    }

    /// Ticker list in subscription order.
    pub fn symbols(&self) -> Vec<String> {
        self.tickers.keys().cloned().collect()
    }
}

/// Result of one allocation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub assignments: BTreeMap<String, Assignment>,
    /// Tickers no consumer could take this cycle.
    pub unassigned: Vec<String>,
}

impl Allocation {
    pub fn assignment(&self, consumer: &str) -> Option<&Assignment> {
        self.assignments.get(consumer)
    }

    /// Total subscriptions across consumers; replicated tickers count once
    /// per consumer.
    pub fn assigned_tickers(&self) -> usize {
        self.assignments.values().map(Assignment::len).sum()
    }

    /// Consumers holding `symbol`.
    pub fn holders(&self, symbol: &str) -> Vec<&str> {
        self.assignments
            .values()
            .filter(|a| a.contains(symbol))
            .map(|a| a.consumer.as_str())
            .collect()
    }

    fn remaining(&self, profile: &ConsumerProfile) -> usize {
        let used = self
            .assignments
            .get(&profile.id)
            .map(Assignment::len)
            .unwrap_or(0);
        profile.capacity.saturating_sub(used)
    }

    fn holds(&self, consumer: &str, symbol: &str) -> bool {
        self.assignments
            .get(consumer)
            .map(|a| a.contains(symbol))
            .unwrap_or(false)
    }

    /// Adds `symbol` to the consumer's assignment if it has room.
    fn assign(
        &mut self,
        profile: &ConsumerProfile,
        symbol: &str,
        category: InstrumentCategory,
    ) -> bool {
        if self.remaining(profile) == 0 {
            return false;
        }
        self.assignments
            .entry(profile.id.clone())
            .or_insert_with(|| Assignment::new(profile))
            .tickers
            .insert(symbol.to_string(), category);
        true
    }
}

/// Inputs to allocation other than the roster.
#[derive(Debug, Clone, Default)]
pub struct AllocationContext {
    pub consumers: Vec<ConsumerProfile>,
    /// Consumers left out of this run (failed, cooling down).
    pub excluded: HashSet<String>,
    /// Configured fallback order per category.
    pub fallback: BTreeMap<InstrumentCategory, Vec<String>>,
    pub routing: RoutingRules,
}

impl AllocationContext {
    pub fn new(consumers: Vec<ConsumerProfile>) -> Self {
        Self {
            consumers,
            ..Default::default()
        }
    }

    pub fn with_fallback(mut self, fallback: BTreeMap<InstrumentCategory, Vec<String>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_routing(mut self, routing: RoutingRules) -> Self {
        self.routing = routing;
        self
    }

    pub fn exclude(&mut self, consumer: impl Into<String>) {
        self.excluded.insert(consumer.into());
    }

    fn profile(&self, id: &str) -> Option<&ConsumerProfile> {
        self.consumers.iter().find(|c| c.id == id)
    }

    fn is_eligible(&self, profile: &ConsumerProfile) -> bool {
        profile.enabled && !self.excluded.contains(&profile.id)
    }

    /// Eligible consumers for `category`, in fallback order.
    ///
    /// Uses the configured list when there is one; otherwise every capable
    /// consumer ordered by (priority, id).
    fn fallback_order(&self, category: InstrumentCategory) -> Vec<&ConsumerProfile> {
        let ordered: Vec<&ConsumerProfile> = match self.fallback.get(&category) {
            Some(ids) => ids.iter().filter_map(|id| self.profile(id)).collect(),
            None => {
                let mut all: Vec<&ConsumerProfile> = self.consumers.iter().collect();
                all.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
                all
            }
        };
        ordered
            .into_iter()
            .filter(|c| self.is_eligible(c) && c.supports(category))
            .collect()
    }

    /// Why a pin cannot be honored, if it cannot.
    fn reject_pin(&self, consumer: &str, asset: &Asset) -> Option<&'static str> {
        if self.routing.overrides_preference(consumer, &asset.symbol) {
            return Some("excluded by routing rule");
        }
        match self.profile(consumer) {
            None => Some("not configured"),
            Some(p) if !p.enabled => Some("disabled"),
            Some(p) if self.excluded.contains(&p.id) => Some("unavailable"),
            Some(p) if !p.supports(asset.category) => Some("does not support the category"),
            Some(_) => None,
        }
    }
}

/// Build a fresh allocation for `assets`.
pub fn allocate(assets: &[Asset], ctx: &AllocationContext) -> Allocation {
    let mut roster: Vec<&Asset> = assets.iter().filter(|a| a.is_active).collect();
    roster.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    roster.dedup_by(|a, b| a.symbol == b.symbol);

    let mut allocation = Allocation::default();
    let mut pinned: BTreeMap<&str, Vec<&Asset>> = BTreeMap::new();
    let mut default_pool: Vec<&Asset> = Vec::new();

    for asset in roster {
        match asset.preferred_consumer.as_deref() {
            Some(consumer) => match ctx.reject_pin(consumer, asset) {
                None => pinned.entry(consumer).or_default().push(asset),
                Some(reason) => {
                    warn!(
                        "Preferred consumer {} for {} ignored ({}), using fallback order",
                        consumer, asset.symbol, reason
                    );
                    default_pool.push(asset);
                }
            },
            None => default_pool.push(asset),
        }
    }

    for (consumer, group) in pinned {
        let Some(profile) = ctx.profile(consumer) else {
            default_pool.extend(group);
            continue;
        };
        for asset in group {
            if !allocation.assign(profile, &asset.symbol, asset.category) {
                warn!(
                    "Preferred consumer {} is full, {} goes to fallback order",
                    consumer, asset.symbol
                );
                default_pool.push(asset);
            }
        }
    }

    default_pool.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    let (crypto, partitioned): (Vec<&Asset>, Vec<&Asset>) = default_pool
        .into_iter()
        .partition(|a| a.category == InstrumentCategory::Crypto);

    for asset in partitioned {
        if !place_exclusive(&mut allocation, ctx, &asset.symbol, asset.category) {
            warn!(
                "No consumer available for {} ({}), unassigned this cycle",
                asset.symbol, asset.category
            );
            allocation.unassigned.push(asset.symbol.clone());
        }
    }

    for asset in crypto {
        if place_replicated(&mut allocation, ctx, &asset.symbol) == 0
            && allocation.holders(&asset.symbol).is_empty()
        {
            warn!(
                "No consumer available for {} ({}), unassigned this cycle",
                asset.symbol, asset.category
            );
            allocation.unassigned.push(asset.symbol.clone());
        }
    }

    debug!(
        "Allocated {} subscriptions across {} consumers, {} unassigned",
        allocation.assigned_tickers(),
        allocation.assignments.len(),
        allocation.unassigned.len()
    );
    allocation
}

/// Tickers a failed consumer held and where they went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reallocation {
    /// (ticker, new consumer) pairs.
    pub moved: Vec<(String, String)>,
    pub unassigned: Vec<String>,
}

impl Reallocation {
    /// Consumers whose ticker set grew.
    pub fn receivers(&self) -> BTreeSet<String> {
        self.moved.iter().map(|(_, c)| c.clone()).collect()
    }
}

/// Move the tickers held by `failed` to other consumers.
///
/// Only the failed consumer's tickers are placed; every other assignment
/// keeps what it already holds.
pub fn reallocate(
    allocation: &mut Allocation,
    failed: &str,
    ctx: &AllocationContext,
) -> Reallocation {
    let mut result = Reallocation::default();
    let Some(orphaned) = allocation.assignments.remove(failed) else {
        return result;
    };

    let mut ctx = ctx.clone();
    ctx.exclude(failed);

    for (symbol, category) in orphaned.tickers {
        if category == InstrumentCategory::Crypto {
            for consumer in replicate_to(allocation, &ctx, &symbol) {
                if let Some(profile) = ctx.profile(&consumer) {
                    allocation.assign(profile, &symbol, category);
                }
                result.moved.push((symbol.clone(), consumer));
            }
            if allocation.holders(&symbol).is_empty() {
                result.unassigned.push(symbol);
            }
            continue;
        }

        let target = ctx
            .fallback_order(category)
            .into_iter()
            .find(|c| allocation.remaining(c) > 0 && ctx.routing.allows(&c.id, &symbol));
        match target {
            Some(profile) => {
                allocation.assign(profile, &symbol, category);
                result.moved.push((symbol, profile.id.clone()));
            }
            None => result.unassigned.push(symbol),
        }
    }

    for symbol in &result.unassigned {
        warn!(
            "No consumer can take {} from failed consumer {}, unassigned",
            symbol, failed
        );
        allocation.unassigned.push(symbol.clone());
    }
    result
}

fn place_exclusive(
    allocation: &mut Allocation,
    ctx: &AllocationContext,
    symbol: &str,
    category: InstrumentCategory,
) -> bool {
    for profile in ctx.fallback_order(category) {
        if allocation.remaining(profile) == 0 || !ctx.routing.allows(&profile.id, symbol) {
            continue;
        }
        return allocation.assign(profile, symbol, category);
    }
    false
}

fn place_replicated(allocation: &mut Allocation, ctx: &AllocationContext, symbol: &str) -> usize {
    let targets = replicate_to(allocation, ctx, symbol);
    for consumer in &targets {
        if let Some(profile) = ctx.profile(consumer) {
            allocation.assign(profile, symbol, InstrumentCategory::Crypto);
        }
    }
    targets.len()
}

/// Eligible crypto consumers with room that do not yet hold `symbol`.
fn replicate_to(allocation: &Allocation, ctx: &AllocationContext, symbol: &str) -> Vec<String> {
    ctx.fallback_order(InstrumentCategory::Crypto)
        .into_iter()
        .filter(|c| {
            !allocation.holds(&c.id, symbol)
                && allocation.remaining(c) > 0
                && ctx.routing.allows(&c.id, symbol)
        })
        .map(|c| c.id.clone())
        .collect()
}
