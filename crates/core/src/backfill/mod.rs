//! Historical backfill: planning windows and executing them through the
//! failover engine.

pub mod backfill_model;
pub mod backfill_service;
pub mod backfill_traits;
pub mod planner;

pub use backfill_model::*;
pub use backfill_service::BackfillService;
pub use backfill_traits::MarketDataStore;
pub use planner::{expected_rows, plan, trading_days};
