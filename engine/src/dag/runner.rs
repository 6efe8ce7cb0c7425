//! Graph execution
//!
//! Ready nodes run concurrently on the calling task via `FuturesUnordered`.
//! Each node attempt is bounded by its policy timeout and retried with
//! backoff. A permanent failure marks every transitive dependent failed
//! without invoking it; independent branches keep going.

use futures::stream::{FuturesUnordered, StreamExt};
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::graph::Graph;
use super::{DagResult, DagStatus, Node, NodeError, NodeFn, NodePolicy, RunContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Validated, reusable graph of nodes
pub struct DagRunner {
    nodes: HashMap<String, Node>,
    graph: Graph,
}

impl std::fmt::Debug for DagRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagRunner")
            .field("nodes", &self.graph.order)
            .finish()
    }
}

impl DagRunner {
    /// Validate the node set. Fails on duplicate ids, unknown dependencies
    /// or a cycle; nothing is executed.
    pub fn new(nodes: Vec<Node>) -> Result<Self, EngineError> {
        let graph = Graph::build(&nodes)?;
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Ok(Self { nodes, graph })
    }

    pub async fn run(&self, ctx: Arc<RunContext>) -> DagResult {
        self.execute(ctx, None).await
    }

    /// Like [`run`](Self::run), but stops the whole run once `deadline`
    /// elapses. Unfinished nodes are reported with a deadline error.
    pub async fn run_with_deadline(&self, ctx: Arc<RunContext>, deadline: Duration) -> DagResult {
        self.execute(ctx, Some(deadline)).await
    }

    async fn execute(&self, ctx: Arc<RunContext>, deadline: Option<Duration>) -> DagResult {
        let started = Instant::now();
        let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);

        let mut state: HashMap<&str, NodeState> = self
            .graph
            .order
            .iter()
            .map(|id| (id.as_str(), NodeState::Pending))
            .collect();
        let mut remaining: HashMap<&str, usize> = self
            .graph
            .order
            .iter()
            .map(|id| (id.as_str(), self.graph.edges.get(id).map_or(0, Vec::len)))
            .collect();

        let mut completed_nodes = Vec::new();
        let mut failed_nodes = Vec::new();
        let mut errors = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        info!("Starting graph run with {} nodes", self.graph.order.len());

        for id in &self.graph.order {
            if remaining.get(id.as_str()) == Some(&0) {
                if let Some(node) = self.nodes.get(id) {
                    state.insert(id.as_str(), NodeState::Running);
                    in_flight.push(run_node(
                        id.clone(),
                        node.executor(),
                        node.policy.clone(),
                        Arc::clone(&ctx),
                    ));
                }
            }
        }

        let mut deadline_hit = false;

        while !in_flight.is_empty() {
            let next = match deadline_at {
                Some(at) => {
                    tokio::select! {
                        finished = in_flight.next() => finished,
                        _ = tokio::time::sleep_until(at) => {
                            deadline_hit = true;
                            break;
                        }
                    }
                }
                None => in_flight.next().await,
            };

            let Some((id, attempts, outcome)) = next else {
                break;
            };

            match outcome {
                Ok(()) => {
                    debug!("Node '{}' completed after {} attempt(s)", id, attempts);
                    state.insert(self.key(&id), NodeState::Completed);
                    completed_nodes.push(id.clone());

                    for dependent in self.graph.reverse_edges.get(&id).into_iter().flatten() {
                        let key = self.key(dependent);
                        let ready = match remaining.get_mut(key) {
                            Some(count) => {
                                *count = count.saturating_sub(1);
                                *count == 0
                            }
                            None => false,
                        };
                        if ready && state.get(key) == Some(&NodeState::Pending) {
                            if let Some(node) = self.nodes.get(dependent) {
                                state.insert(key, NodeState::Running);
                                in_flight.push(run_node(
                                    dependent.clone(),
                                    node.executor(),
                                    node.policy.clone(),
                                    Arc::clone(&ctx),
                                ));
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("Node '{}' failed permanently: {}", id, err);
                    state.insert(self.key(&id), NodeState::Failed);
                    failed_nodes.push(id.clone());
                    errors.push(NodeError::from_engine(&id, &err, attempts));

                    for dependent in self.graph.transitive_dependents(&id) {
                        let key = self.key(&dependent);
                        if state.get(key) == Some(&NodeState::Pending) {
                            state.insert(key, NodeState::Failed);
                            let skipped = EngineError::DependencyFailed {
                                node: dependent.clone(),
                                dependency: id.clone(),
                            };
                            debug!("{}", skipped);
                            errors.push(NodeError::from_engine(&dependent, &skipped, 0));
                            failed_nodes.push(dependent);
                        }
                    }
                }
            }
        }

        if deadline_hit {
            // Dropping the in-flight futures cancels them.
            drop(in_flight);
            let timeout_ms = deadline.map_or(0, |d| d.as_millis() as u64);
            warn!("Graph run hit its {}ms deadline", timeout_ms);

            for id in &self.graph.order {
                if matches!(
                    state.get(id.as_str()),
                    Some(NodeState::Pending) | Some(NodeState::Running)
                ) {
                    let err = EngineError::RunDeadline {
                        node: id.clone(),
                        timeout_ms,
                    };
                    errors.push(NodeError::from_engine(id, &err, 0));
                    failed_nodes.push(id.clone());
                }
            }
        }

        let status = if failed_nodes.is_empty() {
            DagStatus::Completed
        } else {
            DagStatus::Failed
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Graph run finished: {} completed, {} failed in {}ms",
            completed_nodes.len(),
            failed_nodes.len(),
            duration_ms
        );

        DagResult {
            status,
            completed_nodes,
            failed_nodes,
            duration_ms,
            errors,
        }
    }

    /// Borrow the id string owned by the graph so state maps can key on it.
    fn key(&self, id: &str) -> &str {
        self.graph
            .order
            .iter()
            .find(|known| known.as_str() == id)
            .map_or("", String::as_str)
    }
}

/// Run one node under its policy. Returns the id, the attempts used and the
/// final outcome.
async fn run_node(
    id: String,
    execute: NodeFn,
    policy: NodePolicy,
    ctx: Arc<RunContext>,
) -> (String, u32, Result<(), EngineError>) {
    let max_attempts = policy.max_retries.saturating_add(1);
    let timeout_ms = policy.timeout.as_millis() as u64;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        debug!("Executing node '{}' (attempt {}/{})", id, attempt, max_attempts);

        let err = match tokio::time::timeout(policy.timeout, execute(Arc::clone(&ctx))).await {
            Ok(Ok(())) => return (id, attempt, Ok(())),
            Ok(Err(e)) => EngineError::NodeExecution {
                node: id.clone(),
                message: format!("{:#}", e),
            },
            Err(_) => EngineError::NodeTimeout {
                node: id.clone(),
                timeout_ms,
            },
        };

        if attempt < max_attempts {
            let delay = policy.backoff_for(attempt);
            warn!(
                "Node '{}' attempt {} failed: {}. Retrying in {:?}",
                id, attempt, err, delay
            );
            tokio::time::sleep(delay).await;
        }
        last_error = Some(err);
    }

    let err = last_error.unwrap_or(EngineError::NodeExecution {
        node: id.clone(),
        message: "node was never attempted".to_string(),
    });
    (id, max_attempts, Err(err))
}
