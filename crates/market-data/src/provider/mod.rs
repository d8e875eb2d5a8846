//! Vendor client abstractions.
//!
//! This module contains:
//! - The role traits every vendor adapter implements
//! - Provider capabilities and rate limit descriptions
//!
//! Concrete vendor adapters live outside this crate. The engine only ever
//! sees them through these traits and never inspects vendor payload shapes
//! beyond what the validator extracts.

mod capabilities;
mod traits;

// Re-exports
pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::{BarProvider, ProviderQualitySink, RecordProvider, VendorClient};
