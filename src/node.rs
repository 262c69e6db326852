//! Graph nodes: identifiers, the status machine, arena records, and
//! construction specs.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::deps::Deps;
use crate::error::EvalError;
use crate::invalidation::InvalidationTiming;
use crate::observer::NodeObservers;

/// Stable identifier for a node in a runtime's arena.
///
/// Ids are never reused: a destroyed node keeps its slot as a tombstone, so a
/// stale id can never alias a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The raw arena index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Status of a node.
///
/// A node starts `Unevaluated`, moves through `Evaluating` to `Evaluated` or
/// `Errored` on each evaluation cycle, returns to `Invalidated` when marked
/// stale, and reaches `Destroyed` exactly once, terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Never evaluated.
    Unevaluated,
    /// An evaluation cycle is in flight.
    Evaluating,
    /// The cached value is current.
    Evaluated,
    /// The cached value (if any) is stale; the next `evaluate` starts a
    /// fresh cycle.
    Invalidated,
    /// The last cycle failed; `evaluate` re-returns the stored error until
    /// the node is invalidated.
    Errored,
    /// Torn down. No further evaluation or invalidation is permitted.
    Destroyed,
}

/// A type-erased node value, shared between the cache and every reader.
pub type NodeValue = Arc<dyn Any + Send + Sync>;

/// Result of one evaluation cycle, cloned to every concurrent awaiter.
pub(crate) type CycleResult = Result<NodeValue, EvalError>;

/// The in-flight computation handle concurrent callers await.
pub(crate) type CycleFuture = Shared<BoxFuture<'static, CycleResult>>;

/// Teardown hook tied to the most recent successful evaluation.
///
/// Invoked before the next cycle's evaluator runs and on destruction; taken
/// out of its slot before invocation, so it runs at most once.
pub type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub(crate) type Evaluator =
    Arc<dyn Fn(Deps) -> BoxFuture<'static, anyhow::Result<Evaluation>> + Send + Sync>;

/// Output of an evaluator: the produced value plus an optional teardown hook
/// for the resources backing it.
pub struct Evaluation {
    pub(crate) value: NodeValue,
    pub(crate) teardown: Option<Teardown>,
}

impl Evaluation {
    /// Wrap a value with no teardown hook.
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            teardown: None,
        }
    }

    /// Wrap an already-shared value with no teardown hook.
    pub fn from_arc(value: NodeValue) -> Self {
        Self {
            value,
            teardown: None,
        }
    }

    /// Attach a teardown hook for the resources backing this value.
    ///
    /// The hook runs before the next evaluation cycle invokes the evaluator,
    /// and on destruction.
    pub fn with_teardown<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.teardown = Some(Box::new(move || hook().boxed()));
        self
    }
}

impl fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluation")
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

/// Specification for a new node: label, evaluator, declared dependencies,
/// and options.
///
/// Dependencies are fixed for the node's lifetime once the spec is inserted.
///
/// # Example
///
/// ```ignore
/// let doubled = runtime.insert(
///     NodeSpec::new("doubled", |deps| async move {
///         let n: Arc<u32> = deps.get("n")?;
///         Ok(Evaluation::of(*n * 2))
///     })
///     .dependency("n", source),
/// )?;
/// ```
pub struct NodeSpec {
    pub(crate) label: Arc<str>,
    pub(crate) evaluator: Evaluator,
    pub(crate) dependencies: Vec<(Arc<str>, NodeId)>,
    pub(crate) errorable: HashSet<Arc<str>>,
    pub(crate) timing: InvalidationTiming,
}

impl NodeSpec {
    /// Create a spec with a diagnostic label and an evaluator.
    ///
    /// The evaluator receives the resolved dependency map and produces the
    /// node's value, optionally with a teardown hook. It may fail with any
    /// `anyhow`-compatible error.
    pub fn new<F, Fut>(label: impl Into<Arc<str>>, evaluator: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Evaluation>> + Send + 'static,
    {
        Self {
            label: label.into(),
            evaluator: Arc::new(move |deps| evaluator(deps).boxed()),
            dependencies: Vec::new(),
            errorable: HashSet::new(),
            timing: InvalidationTiming::default(),
        }
    }

    /// Declare a dependency under `key`. Redeclaring a key replaces its node.
    pub fn dependency(mut self, key: impl Into<Arc<str>>, node: NodeId) -> Self {
        let key = key.into();
        if let Some(existing) = self.dependencies.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = node;
        } else {
            self.dependencies.push((key, node));
        }
        self
    }

    /// Declare `key` errorable: if that dependency fails, the failure is
    /// masked as an absent value instead of aborting this node's cycle.
    pub fn errorable(mut self, key: impl Into<Arc<str>>) -> Self {
        self.errorable.insert(key.into());
        self
    }

    /// Set when this node's dependents learn about its invalidation.
    pub fn invalidation_timing(mut self, timing: InvalidationTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Arena record backing one node.
pub(crate) struct NodeRecord {
    pub(crate) label: Arc<str>,
    pub(crate) evaluator: Evaluator,
    /// Forward edges, in declaration order. Immutable after construction.
    pub(crate) dependencies: Vec<(Arc<str>, NodeId)>,
    /// Reverse edges, appended when a dependent is constructed and removed
    /// only by destroy.
    pub(crate) dependents: Vec<NodeId>,
    pub(crate) status: NodeStatus,
    /// Bumped by invalidate and destroy; evaluation cycles snapshot it to
    /// detect concurrent staleness.
    pub(crate) generation: u64,
    pub(crate) inflight: Option<CycleFuture>,
    /// Some iff status is Evaluated.
    pub(crate) cached: Option<NodeValue>,
    /// Some iff status is Errored.
    pub(crate) last_error: Option<EvalError>,
    /// Errorable keys currently failing, for notification dedup.
    pub(crate) errored_keys: HashSet<Arc<str>>,
    pub(crate) teardown: Option<Teardown>,
    /// Causal chain awaiting propagation to dependents (OnReevaluation).
    pub(crate) deferred: Option<Vec<NodeId>>,
    pub(crate) errorable: HashSet<Arc<str>>,
    pub(crate) timing: InvalidationTiming,
    pub(crate) observers: NodeObservers,
}

impl NodeRecord {
    pub(crate) fn new(spec: NodeSpec) -> Self {
        Self {
            label: spec.label,
            evaluator: spec.evaluator,
            dependencies: spec.dependencies,
            dependents: Vec::new(),
            status: NodeStatus::Unevaluated,
            generation: 0,
            inflight: None,
            cached: None,
            last_error: None,
            errored_keys: HashSet::new(),
            teardown: None,
            deferred: None,
            errorable: spec.errorable,
            timing: spec.timing,
            observers: NodeObservers::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_redeclaration_replaces_node() {
        let spec = NodeSpec::new("n", |_| async { Ok(Evaluation::of(0u32)) })
            .dependency("a", NodeId(0))
            .dependency("b", NodeId(1))
            .dependency("a", NodeId(2));
        assert_eq!(
            spec.dependencies
                .iter()
                .map(|(k, id)| (k.as_ref(), id.0))
                .collect::<Vec<_>>(),
            [("a", 2), ("b", 1)]
        );
    }

    #[test]
    fn spec_starts_with_default_options() {
        let spec = NodeSpec::new("n", |_| async { Ok(Evaluation::of(0u32)) });
        assert!(spec.errorable.is_empty());
        assert_eq!(spec.timing, InvalidationTiming::Immediate);
    }
}
