//! Provider orchestration.
//!
//! This module provides the REST acquisition machinery:
//! - Capability registry and failover-list ordering
//! - Rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Bar series validation
//! - The failover engine tying them together

mod capability_registry;
mod circuit_breaker;
mod engine;
mod rate_limiter;
mod skip_reason;
mod validator;

pub use capability_registry::{
    Candidate, CapabilityRegistry, FetchOverrides, ProviderDescriptor, DEFAULT_REQUEST_TIMEOUT,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState, DEFAULT_COOL_DOWN,
    DEFAULT_FAILURE_THRESHOLD,
};
pub use engine::{FetchEngine, Fetched};
pub use rate_limiter::{RateLimiter, RATE_WINDOW};
pub use skip_reason::{FetchDiagnostics, ProviderAttempt, SkipReason};
pub use validator::{BarSeriesValidator, RejectionRule, ValidationReport, ValidatorConfig};
