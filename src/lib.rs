//! Depflow: an incremental, dependency-aware evaluation engine.
//!
//! A graph of lazily-computed, memoized, asynchronously-evaluated values:
//! invalidating one node propagates staleness to every transitive dependent,
//! and evaluation re-runs only the minimal stale subgraph.
//!
//! # Key Features
//!
//! - **Memoization**: a node's evaluator runs once per cycle; later
//!   `evaluate` calls return the cached value until the node is invalidated
//! - **In-flight deduplication**: concurrent `evaluate` calls on the same
//!   node await a single shared computation
//! - **Freshness**: a value is never returned if it is already known stale -
//!   a cycle raced by an invalidation restarts before resolving
//! - **Error tolerance**: dependencies declared errorable have failures
//!   masked as absent values, surfaced through a dedicated observer channel
//! - **Resource teardown**: each successful evaluation may attach a teardown
//!   hook, run before the next cycle's evaluator and on destruction - for
//!   externally-owned resources like GPU handles
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use depflow::{Evaluation, NodeSpec, Runtime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::new();
//!
//!     let source = runtime.insert(NodeSpec::new("source", |_| async {
//!         Ok(Evaluation::of(21u32))
//!     }))?;
//!     let doubled = runtime.insert(
//!         NodeSpec::new("doubled", |deps| async move {
//!             let n: Arc<u32> = deps.get("n")?;
//!             Ok(Evaluation::of(*n * 2))
//!         })
//!         .dependency("n", source),
//!     )?;
//!
//!     let value: Arc<u32> = runtime.evaluate_as(doubled).await?;
//!     assert_eq!(*value, 42);
//!
//!     runtime.invalidate(source)?; // doubled is now stale too
//!     runtime.destroy(doubled).await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

mod deps;
mod error;
mod invalidation;
mod node;
mod observer;
mod runtime;

pub use deps::Deps;
pub use error::{Chain, EvalError};
pub use invalidation::InvalidationTiming;
pub use node::{Evaluation, NodeId, NodeSpec, NodeStatus, NodeValue, Teardown};
pub use observer::{ErrorableFailure, Subscription};
pub use runtime::{ErrorableFailureHandler, Runtime, RuntimeBuilder};
