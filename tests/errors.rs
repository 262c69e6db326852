//! Failure propagation: errorable masking, notification dedup, and causal
//! chains across the graph.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use depflow::{EvalError, Evaluation, NodeSpec, NodeStatus, Runtime};

/// Evaluator that fails while `healthy` is false and yields `1` otherwise.
fn flaky(label: &str, healthy: Arc<AtomicBool>) -> NodeSpec {
    NodeSpec::new(label, move |_| {
        let healthy = healthy.clone();
        async move {
            if healthy.load(Ordering::SeqCst) {
                Ok(Evaluation::of(1u32))
            } else {
                Err(anyhow::anyhow!("source offline"))
            }
        }
    })
}

#[tokio::test]
async fn errorable_dependency_failure_is_masked() {
    let rt = Runtime::builder().without_errorable_failure_handler().build();
    let a = rt.insert(flaky("a", Arc::new(AtomicBool::new(false)))).unwrap();
    let b = rt
        .insert(
            NodeSpec::new("b", |deps| async move {
                let fallback: Option<Arc<u32>> = deps.get_opt("a")?;
                Ok(Evaluation::of(fallback.map(|v| *v).unwrap_or(99)))
            })
            .dependency("a", a)
            .errorable("a"),
        )
        .unwrap();

    let value: Arc<u32> = rt.evaluate_as(b).await.unwrap();
    assert_eq!(*value, 99);
    assert_eq!(rt.status(b), Some(NodeStatus::Evaluated));
    // The dependency itself still records its failure.
    assert_eq!(rt.status(a), Some(NodeStatus::Errored));
}

#[tokio::test]
async fn non_errorable_dependency_failure_aborts_the_cycle() {
    let rt = Runtime::new();
    let a = rt.insert(flaky("a", Arc::new(AtomicBool::new(false)))).unwrap();
    let c_runs = Arc::new(AtomicU32::new(0));
    let c = rt
        .insert(
            NodeSpec::new("c", {
                let runs = c_runs.clone();
                move |deps| {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let value: Arc<u32> = deps.get("a")?;
                        Ok(Evaluation::of(*value))
                    }
                }
            })
            .dependency("a", a),
        )
        .unwrap();

    let err = rt.evaluate(c).await.unwrap_err();
    // The cycle aborted at dependency resolution; the evaluator never ran.
    assert_eq!(c_runs.load(Ordering::SeqCst), 0);
    assert_eq!(rt.status(c), Some(NodeStatus::Errored));

    match &err {
        EvalError::Dependency { key, cause, .. } => {
            assert_eq!(key.as_ref(), "a");
            assert!(matches!(cause.as_ref(), EvalError::Evaluation { .. }));
        }
        other => panic!("expected a dependency failure, got {other}"),
    }
    assert_eq!(err.user_error().unwrap().to_string(), "source offline");
}

#[tokio::test]
async fn failure_lineage_spans_the_whole_graph() {
    let rt = Runtime::new();
    let a = rt.insert(flaky("a", Arc::new(AtomicBool::new(false)))).unwrap();
    let b = rt
        .insert(
            NodeSpec::new("b", |deps| async move {
                let value: Arc<u32> = deps.get("a")?;
                Ok(Evaluation::of(*value))
            })
            .dependency("a", a),
        )
        .unwrap();
    let c = rt
        .insert(
            NodeSpec::new("c", |deps| async move {
                let value: Arc<u32> = deps.get("b")?;
                Ok(Evaluation::of(*value))
            })
            .dependency("b", b),
        )
        .unwrap();

    let err = rt.evaluate(c).await.unwrap_err();
    let labels: Vec<_> = err.chain().map(|e| e.label().to_string()).collect();
    assert_eq!(labels, ["c", "b", "a"]);
    assert!(matches!(err.root_cause(), EvalError::Evaluation { .. }));

    // Display renders the full lineage for host diagnostics.
    let rendered = err.to_string();
    assert!(rendered.contains("dependency `b` of node `c` failed"));
    assert!(rendered.contains("dependency `a` of node `b` failed"));
    assert!(rendered.contains("source offline"));
}

#[tokio::test]
async fn repeat_errorable_failures_are_suppressed_until_recovery() {
    let handler_keys: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let rt = Runtime::builder()
        .errorable_failure_handler({
            let keys = handler_keys.clone();
            move |failure| keys.lock().unwrap().push(failure.key.to_string())
        })
        .build();

    let healthy = Arc::new(AtomicBool::new(false));
    let a = rt.insert(flaky("a", healthy.clone())).unwrap();
    let b = rt
        .insert(
            NodeSpec::new("b", |deps| async move {
                let fallback: Option<Arc<u32>> = deps.get_opt("a")?;
                Ok(Evaluation::of(fallback.map(|v| *v).unwrap_or(99)))
            })
            .dependency("a", a)
            .errorable("a"),
        )
        .unwrap();

    let observed = Arc::new(AtomicU32::new(0));
    let _sub = rt
        .on_errorable_failure(b, {
            let observed = observed.clone();
            move |failure| {
                assert_eq!(failure.key.as_ref(), "a");
                observed.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    // First failure notifies.
    let value: Arc<u32> = rt.evaluate_as(b).await.unwrap();
    assert_eq!(*value, 99);
    assert_eq!(observed.load(Ordering::SeqCst), 1);

    // Still failing: suppressed.
    rt.invalidate(a).unwrap();
    let value: Arc<u32> = rt.evaluate_as(b).await.unwrap();
    assert_eq!(*value, 99);
    assert_eq!(observed.load(Ordering::SeqCst), 1);

    // Recovery clears the suppression.
    healthy.store(true, Ordering::SeqCst);
    rt.invalidate(a).unwrap();
    let value: Arc<u32> = rt.evaluate_as(b).await.unwrap();
    assert_eq!(*value, 1);
    assert_eq!(observed.load(Ordering::SeqCst), 1);

    // Failing again after recovery notifies again.
    healthy.store(false, Ordering::SeqCst);
    rt.invalidate(a).unwrap();
    let value: Arc<u32> = rt.evaluate_as(b).await.unwrap();
    assert_eq!(*value, 99);
    assert_eq!(observed.load(Ordering::SeqCst), 2);

    // The process-wide handler saw the same two notifications.
    assert_eq!(handler_keys.lock().unwrap().clone(), vec!["a", "a"]);
}

#[tokio::test]
async fn errorable_failure_carries_the_source_error() {
    let rt = Runtime::builder().without_errorable_failure_handler().build();
    let a = rt.insert(flaky("a", Arc::new(AtomicBool::new(false)))).unwrap();
    let b = rt
        .insert(
            NodeSpec::new("b", |deps| async move {
                let _ = deps.get_opt::<u32>("a")?;
                Ok(Evaluation::of(0u32))
            })
            .dependency("a", a)
            .errorable("a"),
        )
        .unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = rt
        .on_errorable_failure(b, {
            let seen = seen.clone();
            move |failure| seen.lock().unwrap().push(failure.error.to_string())
        })
        .unwrap();

    rt.evaluate(b).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("source offline"));
}
