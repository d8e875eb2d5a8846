//! Per-provider circuit breaker.
//!
//! Tracks consecutive penalised failures per provider and takes a provider
//! out of rotation once they reach a threshold:
//!
//! - **Closed**: Normal operation, calls are allowed.
//! - **Open**: Too many consecutive failures, calls are skipped.
//! - **HalfOpen**: Cool-down elapsed, trial calls are allowed.
//!
//! State is in-memory and resets on restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::models::ProviderId;

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cool-down before an open circuit allows trial calls.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(60);

/// Successful trial calls needed to close a half-open circuit.
const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.opened_at = None;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.half_open_successes = 0;
        self.opened_at = Some(now);
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit stays open before trial calls.
    pub cool_down: Duration,
    /// Trial successes that close a half-open circuit.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cool_down: DEFAULT_COOL_DOWN,
            half_open_success_threshold: HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

/// Snapshot of one provider's circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Thread-safe per-provider circuit breaker.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether calls to the provider are currently allowed.
    ///
    /// Moves an open circuit to HalfOpen once its cool-down has elapsed.
    pub fn is_allowed(&self, provider: &ProviderId) -> bool {
        let mut circuits = self.lock_circuits();
        let Some(circuit) = circuits.get_mut(provider.as_ref()) else {
            return true;
        };

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = circuit
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cool_down)
                    .unwrap_or(true);
                if cooled {
                    info!(
                        "Circuit breaker: '{}' cooled down, moving to HalfOpen",
                        provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_successes = 0;
                }
                cooled
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_success_threshold {
                    info!(
                        "Circuit breaker: closing circuit for '{}' after {} trial successes",
                        provider, circuit.half_open_successes
                    );
                    circuit.close();
                }
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: unexpected success for '{}' while open",
                    provider
                );
            }
        }
    }

    /// Record a penalised failure.
    ///
    /// A failure in HalfOpen reopens the circuit immediately.
    pub fn record_failure(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);
        let now = Instant::now();

        circuit.consecutive_failures += 1;

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} consecutive failures",
                        provider, circuit.consecutive_failures
                    );
                    circuit.open(now);
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.consecutive_failures, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: trial call failed for '{}', reopening",
                    provider
                );
                circuit.open(now);
            }
            CircuitState::Open => {
                circuit.opened_at = Some(now);
            }
        }
    }

    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        self.lock_circuits()
            .get(provider.as_ref())
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        self.lock_circuits()
            .get(provider.as_ref())
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    /// Force a provider's circuit back to Closed.
    pub fn reset(&self, provider: &ProviderId) {
        if let Some(circuit) = self.lock_circuits().get_mut(provider.as_ref()) {
            info!("Circuit breaker: manually resetting '{}'", provider);
            circuit.close();
        }
    }

    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let circuits = self.lock_circuits();
        let mut metrics: Vec<_> = circuits
            .iter()
            .map(|(provider, circuit)| CircuitMetrics {
                provider: provider.clone(),
                state: circuit.state,
                consecutive_failures: circuit.consecutive_failures,
            })
            .collect();
        metrics.sort_by(|a, b| a.provider.cmp(&b.provider));
        metrics
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: threshold,
            cool_down: Duration::from_secs(60),
            half_open_success_threshold: 2,
        })
    }

    #[test]
    fn test_unknown_provider_is_allowed() {
        let cb = CircuitBreaker::new();
        let provider: ProviderId = Cow::Borrowed("FRESH");

        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3);
        let provider: ProviderId = Cow::Borrowed("FLAKY");

        cb.record_failure(&provider);
        cb.record_failure(&provider);
        assert!(cb.is_allowed(&provider));

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_breaks_the_streak() {
        let cb = breaker(3);
        let provider: ProviderId = Cow::Borrowed("RECOVERING");

        cb.record_failure(&provider);
        cb.record_failure(&provider);
        cb.record_success(&provider);
        cb.record_failure(&provider);

        assert_eq!(cb.failure_count(&provider), 1);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cool_down_then_closes() {
        let cb = breaker(1);
        let provider: ProviderId = Cow::Borrowed("COOLING");

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::HalfOpen);

        cb.record_success(&provider);
        assert_eq!(cb.state(&provider), CircuitState::HalfOpen);
        cb.record_success(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1);
        let provider: ProviderId = Cow::Borrowed("RELAPSE");

        cb.record_failure(&provider);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.is_allowed(&provider));

        cb.record_failure(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Open);
        assert!(!cb.is_allowed(&provider));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_circuit() {
        let cb = breaker(1);
        let provider: ProviderId = Cow::Borrowed("MANUAL");

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));

        cb.reset(&provider);
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.metrics()[0].consecutive_failures, 0);
    }
}
