//! Live streaming subscriptions.
//!
//! - `consumer` - Contract every vendor connection implements
//! - `state` - Consumer lifecycle and the shared state table
//! - `rules` - Per-consumer routing predicates
//! - `allocation` - Ticker-to-consumer assignment under capacity limits
//! - `reconnect` - Restart backoff
//! - `worker` - One supervised task per consumer
//! - `orchestrator` - Fleet owner and monitoring loop

pub mod allocation;
pub mod consumer;
pub mod orchestrator;
pub mod reconnect;
pub mod rules;
pub mod state;
mod worker;

pub use allocation::{
    allocate, reallocate, Allocation, AllocationContext, Assignment, ConsumerProfile,
    Reallocation,
};
pub use consumer::{ConsumerError, StreamConsumer};
pub use orchestrator::{ConsumerStatus, OrchestratorStatus, SubscriptionOrchestrator};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rules::{is_foreign_listing, RoutingRule, RoutingRules};
pub use state::{ConsumerState, ConsumerStates};
pub use worker::WorkerEvent;
