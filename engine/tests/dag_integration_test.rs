//! Integration tests for the DAG runner
//!
//! Exercises failure isolation, retries, timeouts and graph validation
//! through the public API only.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_engine::dag::{DagRunner, Node, NodeErrorKind, NodePolicy, RunContext};
use sdk::errors::EngineError;

fn quick(max_retries: u32) -> NodePolicy {
    NodePolicy::new(Duration::from_secs(5), max_retries, Duration::from_millis(1))
}

fn ok_node(id: &str) -> Node {
    let key = id.to_string();
    Node::new(id, move |ctx: Arc<RunContext>| {
        let key = key.clone();
        async move {
            ctx.insert(key, json!(true)).await;
            Ok(())
        }
    })
    .with_policy(quick(0))
}

fn failing_node(id: &str) -> Node {
    Node::new(id, |_ctx: Arc<RunContext>| async { anyhow::bail!("upstream data missing") })
        .with_policy(quick(0))
}

#[tokio::test]
async fn test_failure_skips_only_dependents() {
    //      ┌─ b (fails) ─┐
    //  a ──┤             ├─ d
    //      └─ c ─────────┴─ e
    let runner = DagRunner::new(vec![
        ok_node("a"),
        failing_node("b").depends_on(["a"]),
        ok_node("c").depends_on(["a"]),
        ok_node("d").depends_on(["b", "c"]),
        ok_node("e").depends_on(["c"]),
    ])
    .unwrap();

    let ctx = Arc::new(RunContext::new());
    let result = runner.run(Arc::clone(&ctx)).await;

    assert!(!result.is_success());
    for id in ["a", "c", "e"] {
        assert!(result.completed(id), "{} should have completed", id);
    }
    assert!(!result.completed("b"));
    assert!(!result.completed("d"));

    assert_eq!(result.error_for("b").unwrap().kind, NodeErrorKind::Execution);
    assert_eq!(result.error_for("d").unwrap().kind, NodeErrorKind::Dependency);
    assert!(result
        .failure_summary()
        .unwrap()
        .contains("upstream data missing"));

    // Independent branches still wrote their outputs
    assert_eq!(ctx.get("e").await, Some(json!(true)));
    assert_eq!(ctx.get("d").await, None);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_retry_budget() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = Node::new("flaky", move |ctx: Arc<RunContext>| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            ctx.insert("flaky", json!("done")).await;
            Ok(())
        }
    })
    .with_policy(quick(2));

    let runner = DagRunner::new(vec![flaky, ok_node("after").depends_on(["flaky"])]).unwrap();
    let ctx = Arc::new(RunContext::new());
    let result = runner.run(Arc::clone(&ctx)).await;

    assert!(result.is_success());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(result.completed_nodes, vec!["flaky".to_string(), "after".to_string()]);
    assert_eq!(ctx.get("flaky").await, Some(json!("done")));
}

#[tokio::test]
async fn test_slow_node_times_out_after_retries() {
    let slow = Node::new("slow", |_ctx: Arc<RunContext>| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    })
    .with_policy(NodePolicy::new(
        Duration::from_millis(30),
        1,
        Duration::from_millis(1),
    ));

    let runner = DagRunner::new(vec![slow]).unwrap();
    let result = runner.run(Arc::new(RunContext::new())).await;

    let error = result.error_for("slow").unwrap();
    assert_eq!(error.kind, NodeErrorKind::Timeout);
    assert_eq!(error.attempts, 2);
    assert_eq!(result.failed_nodes, vec!["slow".to_string()]);
}

#[tokio::test]
async fn test_seeded_context_reaches_roots() {
    let seeded = RunContext::with_values([("ticker".to_string(), json!("ACME"))].into());
    let echo = Node::new("echo", |ctx: Arc<RunContext>| async move {
        let ticker: String = ctx.get_as("ticker").await?;
        ctx.insert("echo", json!(ticker.to_lowercase())).await;
        Ok(())
    });

    let runner = DagRunner::new(vec![echo]).unwrap();
    let ctx = Arc::new(seeded);
    assert!(runner.run(Arc::clone(&ctx)).await.is_success());
    assert_eq!(ctx.get("echo").await, Some(json!("acme")));
}

#[test]
fn test_invalid_graphs_rejected_at_construction() {
    let cycle = DagRunner::new(vec![
        ok_node("a").depends_on(["c"]),
        ok_node("b").depends_on(["a"]),
        ok_node("c").depends_on(["b"]),
    ]);
    match cycle {
        Err(e @ EngineError::DagCycle(_)) => {
            assert!(e.is_validation());
            assert!(e.to_string().starts_with("Dependency cycle detected"));
        }
        other => panic!("expected a cycle error, got {:?}", other.err()),
    }

    let unknown = DagRunner::new(vec![ok_node("a").depends_on(["ghost"])]);
    assert!(matches!(
        unknown,
        Err(EngineError::DagUnknownDependency { ref dependency, .. }) if dependency == "ghost"
    ));

    let duplicate = DagRunner::new(vec![ok_node("a"), ok_node("a")]);
    assert!(matches!(duplicate, Err(EngineError::DagDuplicateNode(ref id)) if id == "a"));
}

#[tokio::test]
async fn test_empty_graph_succeeds() {
    let runner = DagRunner::new(Vec::new()).unwrap();
    let result = runner.run(Arc::new(RunContext::new())).await;
    assert!(result.is_success());
    assert!(result.completed_nodes.is_empty());
}
