/// Classification for retry policy.
///
/// Used by the failover engine to decide what a provider error means for
/// the rest of the candidate list. The engine loop is the only place that
/// interprets these classes.
///
/// # Behavior Summary
///
/// | Class | Try Next Provider? | Record Circuit Breaker Failure? |
/// |-------|-------------------|--------------------------------|
/// | `Never` | No | No |
/// | `FailoverWithPenalty` | Yes | Yes (affects future requests) |
/// | `NextProvider` | Yes | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Terminal failure. The request itself is invalid and no other
    /// provider can answer it. Only the engine's own request checks stop
    /// the walk; the same class coming back from an adapter is treated as
    /// `FailoverWithPenalty`.
    Never,

    /// Failover to next provider and record a circuit breaker penalty.
    ///
    /// Used for transport failures, timeouts, vendor-side throttling and
    /// data-quality rejections. After enough consecutive penalties the
    /// circuit opens and the provider is excluded from the pool for a
    /// cool-down period.
    FailoverWithPenalty,

    /// Try next provider without recording any penalty.
    ///
    /// Used when this provider simply does not have the symbol or the
    /// operation, which says nothing about the provider's health.
    NextProvider,
}

impl RetryClass {
    /// Whether the failover loop should move on to the next candidate.
    pub fn tries_next(&self) -> bool {
        !matches!(self, Self::Never)
    }
}
