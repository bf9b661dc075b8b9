//! Workflow validation and the dependency plan the scheduler walks.

use std::collections::{HashMap, HashSet};

use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};

use weft_core::error::{Result, WeftError};
use weft_core::workflow::Workflow;

use crate::registry::ExecutorRegistry;

/// Validated dependency structure of a workflow.
///
/// Blocks are addressed by their index in `Workflow::blocks`.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Block indices in topological order.
    pub order: Vec<usize>,
    /// Distinct upstream blocks of each block.
    pub upstream: Vec<Vec<usize>>,
    /// Distinct downstream blocks of each block.
    pub downstream: Vec<Vec<usize>>,
    /// Position of each block within `order`.
    pub rank: Vec<usize>,
}

impl ExecutionPlan {
    /// Build the plan, rejecting malformed graphs.
    ///
    /// Checks: at least one block, unique ids and normalized ids, known
    /// connection endpoints, no self-loops, no cycles.
    pub fn build(workflow: &Workflow) -> Result<Self> {
        if workflow.blocks.is_empty() {
            return Err(WeftError::Validation("workflow has no blocks".into()));
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index_map: HashMap<&str, NodeIndex> = HashMap::new();
        let mut normalized: HashSet<&str> = HashSet::new();

        for (i, block) in workflow.blocks.iter().enumerate() {
            if block.id.is_empty() {
                return Err(WeftError::Validation(format!("block at position {} has no id", i)));
            }
            if index_map.insert(block.id.as_str(), graph.add_node(i)).is_some() {
                return Err(WeftError::Validation(format!("duplicate block id '{}'", block.id)));
            }
            if !normalized.insert(block.normalized_id.as_str()) {
                return Err(WeftError::Validation(format!(
                    "duplicate normalized id '{}'",
                    block.normalized_id
                )));
            }
        }

        let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); workflow.blocks.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); workflow.blocks.len()];

        for conn in &workflow.connections {
            let endpoint = |id: &str| {
                index_map.get(id).copied().ok_or_else(|| {
                    WeftError::Validation(format!("connection '{}' references unknown block '{}'", conn.id, id))
                })
            };
            let from = endpoint(&conn.source_block_id)?;
            let to = endpoint(&conn.target_block_id)?;
            if from == to {
                return Err(WeftError::Validation(format!(
                    "connection '{}' loops block '{}' onto itself",
                    conn.id, conn.source_block_id
                )));
            }
            if graph.find_edge(from, to).is_none() {
                graph.add_edge(from, to, ());
                upstream[graph[to]].push(graph[from]);
                downstream[graph[from]].push(graph[to]);
            }
        }

        let sorted = algo::toposort(&graph, None)
            .map_err(|cycle| WeftError::CycleDetected(workflow.blocks[graph[cycle.node_id()]].id.clone()))?;
        let order: Vec<usize> = sorted.into_iter().map(|idx| graph[idx]).collect();

        let mut rank = vec![0; order.len()];
        for (pos, &block) in order.iter().enumerate() {
            rank[block] = pos;
        }
        for list in upstream.iter_mut().chain(downstream.iter_mut()) {
            list.sort_by_key(|&b| rank[b]);
        }

        Ok(Self {
            order,
            upstream,
            downstream,
            rank,
        })
    }

    /// Build the plan and check every block type has an executor.
    pub fn validate(workflow: &Workflow, registry: &ExecutorRegistry) -> Result<Self> {
        let plan = Self::build(workflow)?;
        for block in &workflow.blocks {
            registry.get(block.block_type())?;
        }
        Ok(plan)
    }

    /// Blocks with no incoming connections, in topological order.
    pub fn entries(&self) -> Vec<usize> {
        self.order.iter().copied().filter(|&b| self.upstream[b].is_empty()).collect()
    }

    /// Blocks with no outgoing connections, in topological order.
    pub fn sinks(&self) -> Vec<usize> {
        self.order.iter().copied().filter(|&b| self.downstream[b].is_empty()).collect()
    }

    /// Every block reachable downstream of `block`, excluding itself.
    pub fn descendants(&self, block: usize) -> Vec<usize> {
        let mut seen = vec![false; self.downstream.len()];
        let mut stack = self.downstream[block].clone();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            out.push(next);
            stack.extend(self.downstream[next].iter().copied());
        }
        out.sort_by_key(|&b| self.rank[b]);
        out
    }
}
