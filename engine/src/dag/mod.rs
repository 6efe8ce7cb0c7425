//! Dependency-graph execution
//!
//! A pipeline is a set of [`Node`]s, each naming the nodes it depends on.
//! [`DagRunner::new`] validates the graph up front (unique ids, known
//! dependencies, no cycles) and [`DagRunner::run`] executes it:
//!
//! ```text
//! Vec<Node>
//!   ↓
//! Graph::build() → duplicate / unknown-dependency / cycle checks
//!   ↓
//! DagRunner::run() → ready nodes run concurrently, each under its NodePolicy
//!   ↓
//! DagResult { status, completed_nodes, failed_nodes, errors }
//! ```
//!
//! Nodes share data through a [`RunContext`] that lives for one run only.

mod graph;
mod runner;

pub use runner::DagRunner;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use sdk::errors::EngineError;

pub type NodeFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type NodeFn = Arc<dyn Fn(Arc<RunContext>) -> NodeFuture + Send + Sync>;

/// Timeout and retry settings for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodePolicy {
    pub timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles on each further retry.
    pub backoff: Duration,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl NodePolicy {
    pub fn new(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(6);
        self.backoff.saturating_mul(factor)
    }
}

/// A unit of work in the graph
#[derive(Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub dependencies: Vec<String>,
    pub policy: NodePolicy,
    execute: NodeFn,
}

impl Node {
    pub fn new<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            dependencies: Vec::new(),
            policy: NodePolicy::default(),
            execute: Arc::new(move |ctx| -> NodeFuture { Box::pin(execute(ctx)) }),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn executor(&self) -> NodeFn {
        Arc::clone(&self.execute)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Key/value bag shared by the nodes of a single run
#[derive(Debug, Default)]
pub struct RunContext {
    values: RwLock<HashMap<String, Value>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        self.values.write().await.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    /// Read and deserialize a value written by an upstream node.
    pub async fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .get(key)
            .await
            .ok_or_else(|| anyhow::anyhow!("run context has no value for '{}'", key))?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().await.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DagStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    Timeout,
    Execution,
    Dependency,
    Deadline,
}

/// Why a node did not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeError {
    pub node_id: String,
    pub kind: NodeErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl NodeError {
    pub(crate) fn from_engine(node_id: &str, err: &EngineError, attempts: u32) -> Self {
        let kind = match err {
            EngineError::NodeTimeout { .. } => NodeErrorKind::Timeout,
            EngineError::DependencyFailed { .. } => NodeErrorKind::Dependency,
            EngineError::RunDeadline { .. } => NodeErrorKind::Deadline,
            _ => NodeErrorKind::Execution,
        };
        Self {
            node_id: node_id.to_string(),
            kind,
            message: err.to_string(),
            attempts,
        }
    }
}

/// Outcome of one graph run
#[derive(Debug, Clone, Serialize)]
pub struct DagResult {
    pub status: DagStatus,
    /// In completion order.
    pub completed_nodes: Vec<String>,
    /// In the order failures were recorded.
    pub failed_nodes: Vec<String>,
    pub duration_ms: u64,
    pub errors: Vec<NodeError>,
}

impl DagResult {
    pub fn is_success(&self) -> bool {
        self.status == DagStatus::Completed
    }

    pub fn error_for(&self, node_id: &str) -> Option<&NodeError> {
        self.errors.iter().find(|e| e.node_id == node_id)
    }

    pub fn completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }

    /// One-line summary of the first root-cause failure.
    pub fn failure_summary(&self) -> Option<String> {
        self.errors
            .iter()
            .find(|e| e.kind != NodeErrorKind::Dependency)
            .or_else(|| self.errors.first())
            .map(|e| format!("{} (attempts: {})", e.message, e.attempts))
    }
}
