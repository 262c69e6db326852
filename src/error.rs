//! Error types for node evaluation.

use std::sync::Arc;

use crate::node::NodeId;

/// Errors produced by the evaluation engine.
///
/// Every error names the node it was raised on and carries its proximate
/// cause. Dependency failures wrap the failing dependency's own error, so the
/// full lineage of a failure across the graph is preserved; walk it with
/// [`EvalError::chain`] or print it via `Display`, which renders the whole
/// chain.
///
/// The type is `Clone` because a single failure is handed to every concurrent
/// caller awaiting the same evaluation cycle, and re-returned by later
/// `evaluate` calls until the node is invalidated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// The node's evaluator returned an error.
    #[error("evaluator for node `{label}` failed: {cause}")]
    Evaluation {
        /// The node whose evaluator failed.
        node: NodeId,
        /// The node's label.
        label: Arc<str>,
        /// The evaluator's error.
        cause: Arc<anyhow::Error>,
    },

    /// A non-errorable dependency failed, aborting this node's cycle before
    /// its evaluator ran.
    #[error("dependency `{key}` of node `{label}` failed: {cause}")]
    Dependency {
        /// The node whose evaluation was aborted.
        node: NodeId,
        /// The node's label.
        label: Arc<str>,
        /// The dependency key that failed.
        key: Arc<str>,
        /// The dependency's own failure.
        cause: Arc<EvalError>,
    },

    /// A teardown hook failed. The node is left without a confirmed clean
    /// state.
    #[error("teardown hook for node `{label}` failed: {cause}")]
    Teardown {
        /// The node whose teardown hook failed.
        node: NodeId,
        /// The node's label.
        label: Arc<str>,
        /// The hook's error.
        cause: Arc<anyhow::Error>,
    },

    /// An operation was attempted on a destroyed node, or on a node that is
    /// not part of this runtime's graph.
    #[error("cannot {operation} node `{label}`: node is destroyed or unknown")]
    InvalidLifecycle {
        /// The node the operation targeted.
        node: NodeId,
        /// The node's label, or `<unknown>` if the id does not resolve.
        label: Arc<str>,
        /// The operation that was refused.
        operation: &'static str,
    },
}

impl EvalError {
    /// The node this error was raised on.
    pub fn node(&self) -> NodeId {
        match self {
            EvalError::Evaluation { node, .. }
            | EvalError::Dependency { node, .. }
            | EvalError::Teardown { node, .. }
            | EvalError::InvalidLifecycle { node, .. } => *node,
        }
    }

    /// The label of the node this error was raised on.
    pub fn label(&self) -> &str {
        match self {
            EvalError::Evaluation { label, .. }
            | EvalError::Dependency { label, .. }
            | EvalError::Teardown { label, .. }
            | EvalError::InvalidLifecycle { label, .. } => label,
        }
    }

    /// Iterate over the failure lineage, outermost error first.
    ///
    /// Follows `Dependency` causes down to the error that originated the
    /// failure, so a host can inspect the entire path a failure took through
    /// the graph.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// The error that originated this failure (the last element of
    /// [`chain`](EvalError::chain)).
    pub fn root_cause(&self) -> &EvalError {
        let mut current = self;
        while let EvalError::Dependency { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Returns the underlying user error if this error (or its root cause)
    /// came from an evaluator or teardown hook.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self.root_cause() {
            EvalError::Evaluation { cause, .. } | EvalError::Teardown { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Attempts to downcast the underlying user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Iterator over an [`EvalError`]'s failure lineage, outermost first.
///
/// Created by [`EvalError::chain`].
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a EvalError>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a EvalError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = match current {
            EvalError::Dependency { cause, .. } => Some(cause),
            _ => None,
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(node: NodeId) -> EvalError {
        EvalError::Evaluation {
            node,
            label: "leaf".into(),
            cause: Arc::new(anyhow::anyhow!("boom")),
        }
    }

    #[test]
    fn chain_walks_dependency_causes() {
        let root = leaf(NodeId(0));
        let mid = EvalError::Dependency {
            node: NodeId(1),
            label: "mid".into(),
            key: "leaf".into(),
            cause: Arc::new(root),
        };
        let top = EvalError::Dependency {
            node: NodeId(2),
            label: "top".into(),
            key: "mid".into(),
            cause: Arc::new(mid),
        };

        let labels: Vec<_> = top.chain().map(|e| e.label().to_string()).collect();
        assert_eq!(labels, ["top", "mid", "leaf"]);
        assert!(matches!(top.root_cause(), EvalError::Evaluation { .. }));
        assert_eq!(top.user_error().unwrap().to_string(), "boom");
    }

    #[test]
    fn display_renders_full_lineage() {
        let err = EvalError::Dependency {
            node: NodeId(1),
            label: "b".into(),
            key: "a".into(),
            cause: Arc::new(leaf(NodeId(0))),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("dependency `a` of node `b` failed"));
        assert!(rendered.contains("boom"));
    }
}
