//! The runtime: node arena, evaluation engine, and invalidation propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use slab::Slab;

use crate::deps::Deps;
use crate::error::EvalError;
use crate::invalidation::InvalidationTiming;
use crate::node::{
    CycleFuture, CycleResult, NodeId, NodeRecord, NodeSpec, NodeStatus, NodeValue, Teardown,
};
use crate::observer::{
    Channel, ErrorableFailure, EvaluatedFn, InvalidatedFn, NodeObservers, Subscription,
};

/// Handler invoked when an errorable dependency fails and the failure is
/// masked. The process-wide default logs a warning; replace or silence it via
/// [`RuntimeBuilder`].
pub type ErrorableFailureHandler = Arc<dyn Fn(&ErrorableFailure) + Send + Sync>;

/// Consecutive same-cycle restarts tolerated before a warning is logged.
const DEFAULT_RESTART_WARN_THRESHOLD: u32 = 2;

/// The runtime owns the node arena and drives evaluation, invalidation, and
/// destruction.
///
/// This is cheap to clone - all data is behind `Arc`.
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::new();
/// let source = runtime.insert(NodeSpec::new("source", |_| async {
///     Ok(Evaluation::of(21u32))
/// }))?;
/// let value: Arc<u32> = runtime.evaluate_as(source).await?;
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct RuntimeInner {
    nodes: Mutex<Slab<NodeRecord>>,
    next_token: AtomicU64,
    restart_warn_threshold: u32,
    errorable_handler: Option<ErrorableFailureHandler>,
}

fn lifecycle(node: NodeId, label: Arc<str>, operation: &'static str) -> EvalError {
    EvalError::InvalidLifecycle {
        node,
        label,
        operation,
    }
}

fn unknown(node: NodeId, operation: &'static str) -> EvalError {
    lifecycle(node, "<unknown>".into(), operation)
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Insert a new node built from `spec`, wiring it as a dependent of each
    /// of its declared dependencies.
    ///
    /// Dependencies must already exist in this runtime and must not be
    /// destroyed; because the dependency set is fixed at construction, the
    /// graph stays acyclic by construction.
    pub fn insert(&self, spec: NodeSpec) -> Result<NodeId, EvalError> {
        let mut nodes = self.inner.nodes.lock();
        for (_, dep) in &spec.dependencies {
            match nodes.get(dep.0) {
                None => return Err(unknown(*dep, "depend on")),
                Some(rec) if rec.status == NodeStatus::Destroyed => {
                    return Err(lifecycle(*dep, rec.label.clone(), "depend on"))
                }
                Some(_) => {}
            }
        }
        let label = spec.label.clone();
        let dep_ids: Vec<NodeId> = spec.dependencies.iter().map(|(_, dep)| *dep).collect();
        let id = NodeId(nodes.insert(NodeRecord::new(spec)));
        for dep in dep_ids {
            let rec = &mut nodes[dep.0];
            if !rec.dependents.contains(&id) {
                rec.dependents.push(id);
            }
        }
        tracing::debug!(node = %id, label = %label, "node inserted");
        Ok(id)
    }

    /// Evaluate a node, returning its (possibly cached) value.
    ///
    /// Starts a fresh evaluation cycle if the node is `Unevaluated` or
    /// `Invalidated`; joins the in-flight cycle if one is running; returns
    /// the cached value if `Evaluated`; re-returns the stored error if
    /// `Errored`. The resolved value is guaranteed not to be known-stale at
    /// the moment it resolves.
    pub async fn evaluate(&self, id: NodeId) -> Result<NodeValue, EvalError> {
        self.inner.clone().evaluate_node(id).await
    }

    /// Evaluate a node and downcast its value to `T`.
    ///
    /// Call-site glue over [`evaluate`](Runtime::evaluate); the error side is
    /// `anyhow` so a type mismatch and an evaluation failure propagate the
    /// same way.
    pub async fn evaluate_as<T: Send + Sync + 'static>(
        &self,
        id: NodeId,
    ) -> anyhow::Result<Arc<T>> {
        let value = self.evaluate(id).await?;
        value
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("node {id} produced a value of a different type"))
    }

    /// Mark a node stale, recording the causal chain and propagating to its
    /// transitive dependents.
    ///
    /// A no-op on `Unevaluated` or already-`Invalidated` nodes. With the
    /// default `Immediate` timing, all dependents observe `Invalidated`
    /// before this call returns; with `OnReevaluation`, they are invalidated
    /// when this node's next evaluation cycle completes.
    pub fn invalidate(&self, id: NodeId) -> Result<(), EvalError> {
        self.inner.invalidate(id)
    }

    /// Destroy a node: run its stored teardown hook (awaiting completion),
    /// clear its observers and edge bookkeeping, and mark it `Destroyed`.
    ///
    /// Terminal and idempotent - destroying an already-destroyed node is a
    /// no-op, and the teardown hook can never run twice. Any further
    /// `evaluate` or `invalidate` on the node fails with
    /// [`EvalError::InvalidLifecycle`].
    pub async fn destroy(&self, id: NodeId) -> Result<(), EvalError> {
        let (hook, label) = {
            let mut nodes = self.inner.nodes.lock();
            let (hook, label, dependencies) = {
                let Some(node) = nodes.get_mut(id.0) else {
                    return Err(unknown(id, "destroy"));
                };
                if node.status == NodeStatus::Destroyed {
                    return Ok(());
                }
                node.status = NodeStatus::Destroyed;
                node.generation += 1;
                node.inflight = None;
                node.cached = None;
                node.last_error = None;
                node.errored_keys.clear();
                node.deferred = None;
                node.observers.clear();
                node.dependents.clear();
                (
                    node.teardown.take(),
                    node.label.clone(),
                    std::mem::take(&mut node.dependencies),
                )
            };
            for (_, dep) in &dependencies {
                if let Some(dep_node) = nodes.get_mut(dep.0) {
                    dep_node.dependents.retain(|d| *d != id);
                }
            }
            tracing::debug!(node = %id, label = %label, "node destroyed");
            (hook, label)
        };
        if let Some(hook) = hook {
            hook().await.map_err(|cause| EvalError::Teardown {
                node: id,
                label,
                cause: Arc::new(cause),
            })?;
        }
        Ok(())
    }

    /// Subscribe to evaluation completion: the callback receives the cycle's
    /// value or wrapped error each time a cycle for this node finishes.
    ///
    /// Callbacks run synchronously in registration order and are not caught;
    /// a panicking observer propagates to whoever drove the cycle.
    pub fn on_evaluated<F>(&self, id: NodeId, callback: F) -> Result<Subscription, EvalError>
    where
        F: Fn(&Result<NodeValue, EvalError>) + Send + Sync + 'static,
    {
        self.inner
            .subscribe(id, Channel::Evaluated, move |observers, token| {
                observers.evaluated.push((token, Arc::new(callback)));
            })
    }

    /// Subscribe to invalidation: the callback receives the causal chain
    /// (the path the staleness took through the graph, ending at this node).
    pub fn on_invalidated<F>(&self, id: NodeId, callback: F) -> Result<Subscription, EvalError>
    where
        F: Fn(&[NodeId]) + Send + Sync + 'static,
    {
        self.inner
            .subscribe(id, Channel::Invalidated, move |observers, token| {
                observers.invalidated.push((token, Arc::new(callback)));
            })
    }

    /// Subscribe to errorable-dependency failures tolerated by this node.
    ///
    /// Repeat failures of the same key are suppressed until the key
    /// recovers.
    pub fn on_errorable_failure<F>(
        &self,
        id: NodeId,
        callback: F,
    ) -> Result<Subscription, EvalError>
    where
        F: Fn(&ErrorableFailure) + Send + Sync + 'static,
    {
        self.inner
            .subscribe(id, Channel::Errorable, move |observers, token| {
                observers.errorable.push((token, Arc::new(callback)));
            })
    }

    /// Current status of a node, or `None` if the id does not resolve.
    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.inner.nodes.lock().get(id.0).map(|n| n.status)
    }

    /// A node's diagnostic label.
    pub fn label(&self, id: NodeId) -> Option<Arc<str>> {
        self.inner.nodes.lock().get(id.0).map(|n| n.label.clone())
    }

    /// The error a node is currently failing with, if it is `Errored`.
    pub fn last_error(&self, id: NodeId) -> Option<EvalError> {
        self.inner
            .nodes
            .lock()
            .get(id.0)
            .and_then(|n| n.last_error.clone())
    }

    /// A node's declared dependencies, in declaration order.
    pub fn dependencies(&self, id: NodeId) -> Option<Vec<(Arc<str>, NodeId)>> {
        self.inner
            .nodes
            .lock()
            .get(id.0)
            .map(|n| n.dependencies.clone())
    }

    /// The nodes currently depending on `id`.
    pub fn dependents(&self, id: NodeId) -> Option<Vec<NodeId>> {
        self.inner
            .nodes
            .lock()
            .get(id.0)
            .map(|n| n.dependents.clone())
    }

    /// Ids of every node in the arena, destroyed tombstones included.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner
            .nodes
            .lock()
            .iter()
            .map(|(key, _)| NodeId(key))
            .collect()
    }
}

/// Outcome of trying to commit a freshly computed value.
enum CommitOutcome {
    Committed {
        callbacks: Vec<EvaluatedFn>,
        deferred: Option<Vec<NodeId>>,
    },
    /// The node was invalidated while the evaluator ran; the value is stale.
    Stale { teardown: Option<Teardown> },
    /// The node was destroyed while the evaluator ran.
    Destroyed {
        teardown: Option<Teardown>,
        error: EvalError,
    },
}

impl RuntimeInner {
    /// Evaluate a node, deduplicating against any in-flight cycle.
    ///
    /// Boxed because dependency resolution recurses through it.
    fn evaluate_node(self: Arc<Self>, id: NodeId) -> BoxFuture<'static, CycleResult> {
        async move {
            let inflight = {
                let mut nodes = self.nodes.lock();
                let Some(node) = nodes.get_mut(id.0) else {
                    return Err(unknown(id, "evaluate"));
                };
                match node.status {
                    NodeStatus::Destroyed => {
                        return Err(lifecycle(id, node.label.clone(), "evaluate"))
                    }
                    NodeStatus::Errored => {
                        let err = node
                            .last_error
                            .clone()
                            .expect("Errored status implies a stored error");
                        return Err(err);
                    }
                    _ => {}
                }
                if let Some(fut) = &node.inflight {
                    // A cycle is running (possibly restarting after a
                    // concurrent invalidation); join it.
                    fut.clone()
                } else if node.status == NodeStatus::Evaluated {
                    let value = node
                        .cached
                        .clone()
                        .expect("Evaluated status implies a cached value");
                    return Ok(value);
                } else {
                    // Unevaluated or Invalidated: start a fresh cycle and
                    // publish the handle so concurrent callers join it.
                    node.status = NodeStatus::Evaluating;
                    let fut: CycleFuture = {
                        let inner = self.clone();
                        async move { inner.run_cycle(id).await }.boxed().shared()
                    };
                    node.inflight = Some(fut.clone());
                    fut
                }
            };
            inflight.await
        }
        .boxed()
    }

    /// One evaluation cycle: resolve dependencies, run the pending teardown,
    /// invoke the evaluator, and commit - restarting if the node went stale
    /// while the evaluator was suspended.
    async fn run_cycle(self: Arc<Self>, id: NodeId) -> CycleResult {
        let mut restarts: u32 = 0;
        loop {
            let (label, generation, evaluator, dependencies, errorable) = {
                let mut nodes = self.nodes.lock();
                let Some(node) = nodes.get_mut(id.0) else {
                    return Err(unknown(id, "evaluate"));
                };
                if node.status == NodeStatus::Destroyed {
                    return Err(lifecycle(id, node.label.clone(), "evaluate"));
                }
                node.status = NodeStatus::Evaluating;
                (
                    node.label.clone(),
                    node.generation,
                    node.evaluator.clone(),
                    node.dependencies.clone(),
                    node.errorable.clone(),
                )
            };

            // Resolve all declared dependencies concurrently, leaves first.
            let results = join_all(
                dependencies
                    .iter()
                    .map(|(_, dep)| self.clone().evaluate_node(*dep)),
            )
            .await;

            let mut values = HashMap::with_capacity(dependencies.len());
            let mut masked: Vec<(Arc<str>, EvalError)> = Vec::new();
            let mut recovered: Vec<Arc<str>> = Vec::new();
            for ((key, _), result) in dependencies.iter().zip(results) {
                match result {
                    Ok(value) => {
                        recovered.push(key.clone());
                        values.insert(key.clone(), Some(value));
                    }
                    Err(err) if errorable.contains(key) => {
                        masked.push((key.clone(), err));
                        values.insert(key.clone(), None);
                    }
                    Err(err) => {
                        // A non-errorable dependency failed: abort the cycle
                        // without invoking the evaluator.
                        return self.commit_error(
                            id,
                            EvalError::Dependency {
                                node: id,
                                label,
                                key: key.clone(),
                                cause: Arc::new(err),
                            },
                        );
                    }
                }
            }
            self.notify_errorable_failures(id, &recovered, masked);

            // Run the previous cycle's teardown hook before the evaluator.
            let pending_teardown = {
                let mut nodes = self.nodes.lock();
                nodes.get_mut(id.0).and_then(|node| node.teardown.take())
            };
            if let Some(hook) = pending_teardown {
                if let Err(cause) = hook().await {
                    return self.commit_error(
                        id,
                        EvalError::Teardown {
                            node: id,
                            label,
                            cause: Arc::new(cause),
                        },
                    );
                }
            }

            let evaluation = match (evaluator)(Deps::new(values)).await {
                Ok(evaluation) => evaluation,
                Err(cause) => {
                    return self.commit_error(
                        id,
                        EvalError::Evaluation {
                            node: id,
                            label,
                            cause: Arc::new(cause),
                        },
                    );
                }
            };

            match self.try_commit_value(
                id,
                generation,
                evaluation.value.clone(),
                evaluation.teardown,
            ) {
                CommitOutcome::Committed {
                    callbacks,
                    deferred,
                } => {
                    let result = Ok(evaluation.value);
                    for callback in callbacks {
                        callback(&result);
                    }
                    if let Some(chain) = deferred {
                        self.flush_deferred(id, chain);
                    }
                    return result;
                }
                CommitOutcome::Stale { teardown } => {
                    restarts += 1;
                    if restarts > self.restart_warn_threshold {
                        tracing::warn!(
                            node = %id,
                            label = %label,
                            restarts,
                            "evaluation keeps restarting; a caller is invalidating this node while it evaluates"
                        );
                    }
                    // The discarded value's resources are released before the
                    // evaluator runs again.
                    if let Some(hook) = teardown {
                        if let Err(cause) = hook().await {
                            return self.commit_error(
                                id,
                                EvalError::Teardown {
                                    node: id,
                                    label,
                                    cause: Arc::new(cause),
                                },
                            );
                        }
                    }
                    continue;
                }
                CommitOutcome::Destroyed { teardown, error } => {
                    if let Some(hook) = teardown {
                        if let Err(cause) = hook().await {
                            tracing::warn!(
                                node = %id,
                                error = %cause,
                                "teardown of a value discarded by destroy failed"
                            );
                        }
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Update errorable-key bookkeeping and emit de-duplicated notifications.
    fn notify_errorable_failures(
        &self,
        id: NodeId,
        recovered: &[Arc<str>],
        masked: Vec<(Arc<str>, EvalError)>,
    ) {
        let mut to_notify: Vec<ErrorableFailure> = Vec::new();
        let callbacks = {
            let mut nodes = self.nodes.lock();
            let Some(node) = nodes.get_mut(id.0) else {
                return;
            };
            if node.status == NodeStatus::Destroyed {
                return;
            }
            for key in recovered {
                node.errored_keys.remove(key);
            }
            for (key, error) in masked {
                if node.errored_keys.insert(key.clone()) {
                    to_notify.push(ErrorableFailure {
                        node: id,
                        key,
                        error,
                    });
                }
            }
            if to_notify.is_empty() {
                return;
            }
            node.observers
                .errorable
                .iter()
                .map(|(_, f)| f.clone())
                .collect::<Vec<_>>()
        };
        for failure in &to_notify {
            if let Some(handler) = &self.errorable_handler {
                handler(failure);
            }
            for callback in &callbacks {
                callback(failure);
            }
        }
    }

    /// Commit a fresh value unless the node went stale or was destroyed
    /// while the evaluator was suspended.
    fn try_commit_value(
        &self,
        id: NodeId,
        generation: u64,
        value: NodeValue,
        teardown: Option<Teardown>,
    ) -> CommitOutcome {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(id.0) else {
            return CommitOutcome::Destroyed {
                teardown,
                error: unknown(id, "evaluate"),
            };
        };
        if node.status == NodeStatus::Destroyed {
            return CommitOutcome::Destroyed {
                teardown,
                error: lifecycle(id, node.label.clone(), "evaluate"),
            };
        }
        if node.generation != generation || node.status != NodeStatus::Evaluating {
            return CommitOutcome::Stale { teardown };
        }
        node.status = NodeStatus::Evaluated;
        node.cached = Some(value);
        node.teardown = teardown;
        node.last_error = None;
        node.inflight = None;
        CommitOutcome::Committed {
            callbacks: node
                .observers
                .evaluated
                .iter()
                .map(|(_, f)| f.clone())
                .collect(),
            deferred: node.deferred.take(),
        }
    }

    /// Commit a failed cycle: store the wrapped error and notify observers.
    ///
    /// Errors commit even if a concurrent invalidation raced the failing
    /// cycle; only successfully computed values restart (see DESIGN.md).
    fn commit_error(&self, id: NodeId, err: EvalError) -> CycleResult {
        let (callbacks, deferred) = {
            let mut nodes = self.nodes.lock();
            let Some(node) = nodes.get_mut(id.0) else {
                return Err(err);
            };
            if node.status == NodeStatus::Destroyed {
                return Err(lifecycle(id, node.label.clone(), "evaluate"));
            }
            node.status = NodeStatus::Errored;
            node.last_error = Some(err.clone());
            node.cached = None;
            node.inflight = None;
            (
                node.observers
                    .evaluated
                    .iter()
                    .map(|(_, f)| f.clone())
                    .collect::<Vec<_>>(),
                node.deferred.take(),
            )
        };
        let result = Err(err);
        for callback in callbacks {
            callback(&result);
        }
        if let Some(chain) = deferred {
            self.flush_deferred(id, chain);
        }
        result
    }

    /// External invalidation entry point.
    fn invalidate(&self, id: NodeId) -> Result<(), EvalError> {
        let mut pending: Vec<(Vec<InvalidatedFn>, Vec<NodeId>)> = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let Some(node) = nodes.get(id.0) else {
                return Err(unknown(id, "invalidate"));
            };
            if node.status == NodeStatus::Destroyed {
                return Err(lifecycle(id, node.label.clone(), "invalidate"));
            }
            self.propagate_locked(&mut nodes, vec![(id, Vec::new())], &mut pending);
        }
        for (callbacks, chain) in pending {
            for callback in callbacks {
                callback(&chain);
            }
        }
        Ok(())
    }

    /// Propagate deferred staleness to a node's dependents after its cycle
    /// completed.
    fn flush_deferred(&self, id: NodeId, chain: Vec<NodeId>) {
        let mut pending: Vec<(Vec<InvalidatedFn>, Vec<NodeId>)> = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let worklist: Vec<(NodeId, Vec<NodeId>)> = match nodes.get(id.0) {
                Some(node) => node
                    .dependents
                    .iter()
                    .map(|dep| (*dep, chain.clone()))
                    .collect(),
                None => return,
            };
            self.propagate_locked(&mut nodes, worklist, &mut pending);
        }
        for (callbacks, chain) in pending {
            for callback in callbacks {
                callback(&chain);
            }
        }
    }

    /// Walk reverse edges with an explicit worklist, marking dependents
    /// stale. Each work item carries the causal chain that reached it.
    /// Observer callbacks are collected and invoked after the lock drops.
    fn propagate_locked(
        &self,
        nodes: &mut Slab<NodeRecord>,
        mut worklist: Vec<(NodeId, Vec<NodeId>)>,
        pending: &mut Vec<(Vec<InvalidatedFn>, Vec<NodeId>)>,
    ) {
        while let Some((target, chain)) = worklist.pop() {
            let Some(node) = nodes.get_mut(target.0) else {
                continue;
            };
            match node.status {
                // Nothing current to go stale; stopping here also keeps
                // re-invalidation of an already-stale subgraph from
                // re-walking it.
                NodeStatus::Unevaluated | NodeStatus::Invalidated | NodeStatus::Destroyed => {
                    continue;
                }
                NodeStatus::Evaluating => {
                    node.status = NodeStatus::Invalidated;
                    node.generation += 1;
                }
                NodeStatus::Evaluated => {
                    node.status = NodeStatus::Invalidated;
                    node.generation += 1;
                    node.cached = None;
                }
                NodeStatus::Errored => {
                    node.status = NodeStatus::Invalidated;
                    node.generation += 1;
                    node.last_error = None;
                }
            }
            let mut chain = chain;
            chain.push(target);
            let callbacks: Vec<InvalidatedFn> = node
                .observers
                .invalidated
                .iter()
                .map(|(_, f)| f.clone())
                .collect();
            if !callbacks.is_empty() {
                pending.push((callbacks, chain.clone()));
            }
            match node.timing {
                InvalidationTiming::Immediate => {
                    for dependent in node.dependents.clone() {
                        worklist.push((dependent, chain.clone()));
                    }
                }
                InvalidationTiming::OnReevaluation => {
                    if node.deferred.is_none() {
                        node.deferred = Some(chain);
                    }
                }
            }
        }
    }

    fn subscribe(
        self: &Arc<Self>,
        id: NodeId,
        channel: Channel,
        register: impl FnOnce(&mut NodeObservers, u64),
    ) -> Result<Subscription, EvalError> {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(id.0) else {
            return Err(unknown(id, "subscribe to"));
        };
        if node.status == NodeStatus::Destroyed {
            return Err(lifecycle(id, node.label.clone(), "subscribe to"));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        register(&mut node.observers, token);
        Ok(Subscription {
            runtime: Arc::downgrade(self),
            node: id,
            channel,
            token,
        })
    }

    pub(crate) fn unsubscribe(&self, node: NodeId, channel: Channel, token: u64) {
        let mut nodes = self.nodes.lock();
        if let Some(rec) = nodes.get_mut(node.0) {
            rec.observers.remove(channel, token);
        }
    }
}

/// Builder for [`Runtime`] with customizable settings.
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::builder()
///     .restart_warn_threshold(5)
///     .without_errorable_failure_handler()
///     .build();
/// ```
pub struct RuntimeBuilder {
    restart_warn_threshold: u32,
    errorable_handler: Option<ErrorableFailureHandler>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn log_errorable_failure(failure: &ErrorableFailure) {
    tracing::warn!(
        node = %failure.node,
        key = %failure.key,
        error = %failure.error,
        "errorable dependency failed; substituting an absent value"
    );
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            restart_warn_threshold: DEFAULT_RESTART_WARN_THRESHOLD,
            errorable_handler: Some(Arc::new(log_errorable_failure)),
        }
    }

    /// Number of consecutive restarts of one evaluation cycle tolerated
    /// before a warning is logged. Restarting is not an engine fault - it
    /// means a caller keeps invalidating the node while it evaluates - so
    /// the diagnostic is non-fatal.
    pub fn restart_warn_threshold(mut self, restarts: u32) -> Self {
        self.restart_warn_threshold = restarts;
        self
    }

    /// Replace the process-wide handler invoked when an errorable dependency
    /// fails. The default logs a warning.
    pub fn errorable_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ErrorableFailure) + Send + Sync + 'static,
    {
        self.errorable_handler = Some(Arc::new(handler));
        self
    }

    /// Silence the process-wide errorable-failure handler. Per-node
    /// observers still fire.
    pub fn without_errorable_failure_handler(mut self) -> Self {
        self.errorable_handler = None;
        self
    }

    /// Build the runtime with the configured settings.
    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                nodes: Mutex::new(Slab::new()),
                next_token: AtomicU64::new(0),
                restart_warn_threshold: self.restart_warn_threshold,
                errorable_handler: self.errorable_handler,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Evaluation;

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Runtime>();
        assert_sync::<Runtime>();
    }

    fn constant(value: u32) -> NodeSpec {
        NodeSpec::new("constant", move |_| async move { Ok(Evaluation::of(value)) })
    }

    #[test]
    fn insert_wires_reverse_edges() {
        let rt = Runtime::new();
        let a = rt.insert(constant(1)).unwrap();
        let b = rt.insert(constant(2).dependency("a", a)).unwrap();

        assert_eq!(rt.dependents(a).unwrap(), vec![b]);
        assert_eq!(rt.dependencies(b).unwrap()[0].1, a);
        assert_eq!(rt.status(b), Some(NodeStatus::Unevaluated));
    }

    #[test]
    fn insert_rejects_unknown_dependency() {
        let rt = Runtime::new();
        // An id issued by a different runtime does not resolve here.
        let foreign = Runtime::new().insert(constant(1)).unwrap();
        let err = rt
            .insert(constant(2).dependency("a", foreign))
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidLifecycle { .. }));
    }

    #[test]
    fn invalidate_before_first_evaluation_is_a_noop() {
        let rt = Runtime::new();
        let a = rt.insert(constant(1)).unwrap();
        rt.invalidate(a).unwrap();
        assert_eq!(rt.status(a), Some(NodeStatus::Unevaluated));
    }

    #[test]
    fn unsubscribe_removes_callback() {
        let rt = Runtime::new();
        let a = rt.insert(constant(1)).unwrap();
        let sub = rt.on_invalidated(a, |_| {}).unwrap();
        {
            let nodes = rt.inner.nodes.lock();
            assert_eq!(nodes[a.0].observers.invalidated.len(), 1);
        }
        sub.unsubscribe();
        {
            let nodes = rt.inner.nodes.lock();
            assert!(nodes[a.0].observers.invalidated.is_empty());
        }
    }
}
