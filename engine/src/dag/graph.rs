//! Graph validation
//!
//! Builds forward and reverse adjacency for a node set and rejects duplicate
//! ids, unknown dependencies and cycles before anything runs.

use sdk::errors::EngineError;
use std::collections::{HashMap, HashSet};

use super::Node;

#[derive(Debug)]
pub(crate) struct Graph {
    /// Node ids in declaration order.
    pub order: Vec<String>,
    /// node -> its dependencies
    pub edges: HashMap<String, Vec<String>>,
    /// node -> nodes that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn build(nodes: &[Node]) -> Result<Self, EngineError> {
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::DagDuplicateNode(node.id.clone()));
            }
        }

        let mut edges = HashMap::with_capacity(nodes.len());
        let mut reverse_edges: HashMap<String, Vec<String>> = nodes
            .iter()
            .map(|n| (n.id.clone(), Vec::new()))
            .collect();

        for node in nodes {
            let mut deps = Vec::with_capacity(node.dependencies.len());
            for dep in &node.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(EngineError::DagUnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if deps.contains(dep) {
                    continue;
                }
                deps.push(dep.clone());
                if let Some(dependents) = reverse_edges.get_mut(dep) {
                    dependents.push(node.id.clone());
                }
            }
            edges.insert(node.id.clone(), deps);
        }

        let graph = Self {
            order: nodes.iter().map(|n| n.id.clone()).collect(),
            edges,
            reverse_edges,
        };

        if let Some(cycle) = graph.detect_cycle() {
            return Err(EngineError::DagCycle(cycle));
        }

        Ok(graph)
    }

    /// Depth-first search over dependency edges. Returns the cycle as a path
    /// that starts and ends on the same node.
    fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = self
            .order
            .iter()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();

        for root in &self.order {
            if marks.get(root.as_str()) != Some(&Mark::Unvisited) {
                continue;
            }

            // (node, index of next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            marks.insert(root.as_str(), Mark::OnStack);

            while let Some((node, next)) = stack.last().copied() {
                let deps = self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]);

                if next >= deps.len() {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                }

                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                let dep = deps[next].as_str();
                match marks.get(dep).copied().unwrap_or(Mark::Done) {
                    Mark::Unvisited => {
                        marks.insert(dep, Mark::OnStack);
                        stack.push((dep, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(id, _)| *id == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }

    /// Every node that transitively depends on `id`, breadth first.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = std::collections::VecDeque::from([id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.reverse_edges.get(&current).into_iter().flatten() {
                if visited.insert(dependent.clone()) {
                    result.push(dependent.clone());
                    queue.push_back(dependent.clone());
                }
            }
        }
        result
    }
}
