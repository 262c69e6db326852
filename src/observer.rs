//! Observer channels and subscription handles.

use std::sync::{Arc, Weak};

use crate::error::EvalError;
use crate::node::{NodeId, NodeValue};
use crate::runtime::RuntimeInner;

/// Payload of the errorable-dependency-failed channel.
///
/// Emitted when a dependency declared errorable fails and its failure is
/// masked as an absent value. Repeat failures of the same key are suppressed
/// until the key recovers.
#[derive(Debug, Clone)]
pub struct ErrorableFailure {
    /// The node whose evaluation tolerated the failure.
    pub node: NodeId,
    /// The dependency key that failed.
    pub key: Arc<str>,
    /// The dependency's failure.
    pub error: EvalError,
}

pub(crate) type EvaluatedFn = Arc<dyn Fn(&Result<NodeValue, EvalError>) + Send + Sync>;
pub(crate) type InvalidatedFn = Arc<dyn Fn(&[NodeId]) + Send + Sync>;
pub(crate) type ErrorableFn = Arc<dyn Fn(&ErrorableFailure) + Send + Sync>;

/// Which observer channel a subscription belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Evaluated,
    Invalidated,
    Errorable,
}

/// Per-node observer registrations, ordered by registration token.
#[derive(Default)]
pub(crate) struct NodeObservers {
    pub(crate) evaluated: Vec<(u64, EvaluatedFn)>,
    pub(crate) invalidated: Vec<(u64, InvalidatedFn)>,
    pub(crate) errorable: Vec<(u64, ErrorableFn)>,
}

impl NodeObservers {
    pub(crate) fn remove(&mut self, channel: Channel, token: u64) {
        match channel {
            Channel::Evaluated => self.evaluated.retain(|(t, _)| *t != token),
            Channel::Invalidated => self.invalidated.retain(|(t, _)| *t != token),
            Channel::Errorable => self.errorable.retain(|(t, _)| *t != token),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.evaluated.clear();
        self.invalidated.clear();
        self.errorable.clear();
    }
}

/// Handle for a registered observer callback.
///
/// Returned by the `Runtime` subscribe methods. Dropping the handle leaves
/// the callback registered; call [`unsubscribe`](Subscription::unsubscribe)
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) runtime: Weak<RuntimeInner>,
    pub(crate) node: NodeId,
    pub(crate) channel: Channel,
    pub(crate) token: u64,
}

impl Subscription {
    /// Remove the callback this subscription registered.
    ///
    /// A no-op if the runtime is gone or the node has been destroyed.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.runtime.upgrade() {
            inner.unsubscribe(self.node, self.channel, self.token);
        }
    }
}
