//! Contract between the orchestrator and a vendor's streaming connection.

use async_trait::async_trait;
use thiserror::Error;

use quotehub_market_data::InstrumentCategory;

/// Lifecycle failure reported by a streaming consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Stream failed: {0}")]
    Stream(String),

    #[error("Connection closed")]
    Closed,
}

/// A long-lived push connection to one vendor.
///
/// One instance per configured vendor for the lifetime of the process. The
/// orchestrator drives it `connect` → `subscribe` → `run`, and may call
/// `subscribe` again while `run` is in progress to replace the ticker set
/// in place.
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    fn id(&self) -> &str;

    /// Maximum concurrent subscriptions.
    fn max_subscriptions(&self) -> usize;

    fn categories(&self) -> &[InstrumentCategory];

    /// Lower is preferred when no fallback order is configured.
    fn priority(&self) -> u8 {
        10
    }

    fn supports(&self, category: InstrumentCategory) -> bool {
        self.categories().contains(&category)
    }

    async fn connect(&self) -> Result<(), ConsumerError>;

    /// Replace the subscribed ticker set.
    async fn subscribe(&self, tickers: &[String]) -> Result<(), ConsumerError>;

    /// Receive loop. Returns `Ok(())` when the connection ends normally.
    ///
    /// Transient drops are the consumer's own business; returning means the
    /// connection is gone for good.
    async fn run(&self) -> Result<(), ConsumerError>;

    async fn health_check(&self) -> bool;

    async fn disconnect(&self);
}
