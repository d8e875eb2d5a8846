//! Sliding-window rate limiter for market data providers.
//!
//! Each provider keeps a log of call timestamps covering the last 60
//! seconds. The log is pruned on every check; a provider is saturated once
//! its log holds as many entries as its per-minute budget. Providers never
//! share a log, so one saturated provider cannot delay another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::models::ProviderId;

/// Length of the rolling window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Call log for a single provider.
#[derive(Debug)]
struct CallLog {
    /// Timestamps of calls inside the window, oldest first.
    calls: VecDeque<Instant>,
    /// Maximum calls per window.
    budget: u32,
}

impl CallLog {
    fn new(budget: u32) -> Self {
        Self {
            calls: VecDeque::with_capacity(budget as usize),
            budget,
        }
    }

    /// Drop entries that have aged out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_slot(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.calls.len() < self.budget as usize
    }

    fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
    }

    /// Time until the oldest entry leaves the window.
    fn time_until_slot(&mut self, now: Instant) -> Duration {
        if self.has_slot(now) {
            return Duration::ZERO;
        }
        self.calls
            .front()
            .map(|oldest| RATE_WINDOW.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-provider sliding-window rate limiter.
///
/// Thread-safe; every provider log sits behind one mutex that is never held
/// across an await point. Providers that were never configured with a
/// budget are always allowed.
pub struct RateLimiter {
    logs: Mutex<HashMap<String, CallLog>>,
}

impl RateLimiter {
    /// Create a limiter with no configured providers.
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the logs mutex, recovering from poison if necessary.
    ///
    /// A poisoned log at worst lets one extra call through.
    fn lock_logs(&self) -> MutexGuard<'_, HashMap<String, CallLog>> {
        self.logs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Set the per-minute budget for a provider.
    ///
    /// `None` or a zero budget removes the limit. Reconfiguring discards
    /// the existing log.
    pub fn configure(&self, provider: &ProviderId, requests_per_minute: Option<u32>) {
        let mut logs = self.lock_logs();
        match requests_per_minute {
            Some(budget) if budget > 0 => {
                logs.insert(provider.to_string(), CallLog::new(budget));
            }
            _ => {
                logs.remove(provider.as_ref());
            }
        }
    }

    /// Whether a call to `provider` would be admitted right now.
    ///
    /// Does not record a call.
    pub fn allow(&self, provider: &ProviderId) -> bool {
        let mut logs = self.lock_logs();
        match logs.get_mut(provider.as_ref()) {
            Some(log) => log.has_slot(Instant::now()),
            None => true,
        }
    }

    /// Record a call if the provider has a free slot.
    ///
    /// Returns false, without recording, when the window is full.
    pub fn try_acquire(&self, provider: &ProviderId) -> bool {
        let mut logs = self.lock_logs();
        let Some(log) = logs.get_mut(provider.as_ref()) else {
            return true;
        };

        let now = Instant::now();
        if log.has_slot(now) {
            log.record(now);
            true
        } else {
            false
        }
    }

    /// Wait until the provider has a free slot, then record the call.
    pub async fn acquire(&self, provider: &ProviderId) {
        loop {
            let wait_time = {
                let mut logs = self.lock_logs();
                let Some(log) = logs.get_mut(provider.as_ref()) else {
                    return;
                };

                let now = Instant::now();
                if log.has_slot(now) {
                    log.record(now);
                    debug!("Rate limiter: slot acquired for '{}'", provider);
                    return;
                }

                log.time_until_slot(now)
            };

            debug!(
                "Rate limiter: waiting {:?} for provider '{}'",
                wait_time, provider
            );
            tokio::time::sleep(wait_time.max(Duration::from_millis(1))).await;
        }
    }

    /// Calls still available to `provider` in the current window.
    ///
    /// `None` when the provider has no budget configured.
    pub fn remaining(&self, provider: &ProviderId) -> Option<u32> {
        let mut logs = self.lock_logs();
        logs.get_mut(provider.as_ref()).map(|log| {
            log.prune(Instant::now());
            log.budget.saturating_sub(log.calls.len() as u32)
        })
    }

    /// Forget all recorded calls for a provider, keeping its budget.
    pub fn reset(&self, provider: &ProviderId) {
        let mut logs = self.lock_logs();
        if let Some(log) = logs.get_mut(provider.as_ref()) {
            log.calls.clear();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
