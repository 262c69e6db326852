//! Invalidation timing policy.

/// When a node's dependents learn that it went stale.
///
/// The causal chain handed to invalidation observers is the same either way;
/// only the moment dependents transition to `Invalidated` differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationTiming {
    /// Dependents are invalidated synchronously, before the mutating call
    /// returns. An `evaluate` issued immediately afterwards is guaranteed to
    /// observe the new `Invalidated` status.
    #[default]
    Immediate,

    /// Dependents are invalidated only after this node's next evaluation
    /// cycle completes, so downstream work picks up the refreshed value
    /// directly instead of churning twice.
    OnReevaluation,
}
