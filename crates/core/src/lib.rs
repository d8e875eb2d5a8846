//! QuoteHub Core - backfill planning and streaming orchestration.
//!
//! This crate sits on top of `quotehub-market-data`. It decides what history
//! each asset still needs and drives the failover engine to fetch it, and it
//! keeps a fleet of streaming connections subscribed to the live roster.
//! Storage and the asset roster are reached through traits implemented by
//! the host application.

pub mod assets;
pub mod backfill;
pub mod constants;
pub mod errors;
pub mod settings;
pub mod streaming;

pub use assets::{Asset, AssetRepositoryTrait};
pub use backfill::{BackfillService, MarketDataStore};
pub use settings::{EngineSettings, SettingsHandle};
pub use streaming::{StreamConsumer, SubscriptionOrchestrator};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
