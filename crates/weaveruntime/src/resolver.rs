//! Graph resolution: validate a workflow and derive what the engine needs to
//! walk it.
//!
//! Rules enforced, in order:
//! 1. At least one node must be of a trigger kind.
//! 2. Node ids are unique.
//! 3. Every connection references existing nodes, never loops a node onto
//!    itself and never targets a trigger.
//! 4. The graph is acyclic.
//!
//! No fixed order is flattened out of the graph. The plan only records the
//! routes leaving each node and how many inbound connections each node must
//! see settle before it can run, so branch nodes can leave whole subgraphs
//! untouched.

use crate::registry::NodeRegistry;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};
use weavecore::{NodeId, Workflow, WorkflowError};

/// One outgoing connection, seen from its source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Position of the connection in the workflow's connection list
    pub connection_index: usize,
    pub source_output: String,
    pub target_node_id: NodeId,
    pub target_input: String,
}

/// Resolved view of a workflow graph
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    triggers: Vec<NodeId>,
    routes: HashMap<NodeId, Vec<Route>>,
    inbound: HashMap<NodeId, usize>,
    reachable: HashSet<NodeId>,
}

impl ExecutionPlan {
    /// Trigger nodes in workflow declaration order
    pub fn triggers(&self) -> &[NodeId] {
        &self.triggers
    }

    /// Outgoing connections of `node_id`, in declaration order
    pub fn routes_from(&self, node_id: &str) -> &[Route] {
        self.routes.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of inbound connections from reachable sources
    pub fn required_inputs(&self, node_id: &str) -> usize {
        self.inbound.get(node_id).copied().unwrap_or(0)
    }

    /// Whether any trigger can reach `node_id`
    pub fn is_reachable(&self, node_id: &str) -> bool {
        self.reachable.contains(node_id)
    }

    pub fn reachable_count(&self) -> usize {
        self.reachable.len()
    }
}

/// Stateless resolver; the registry decides which node types are triggers.
pub struct GraphResolver;

impl GraphResolver {
    pub fn resolve(workflow: &Workflow, registry: &NodeRegistry) -> Result<ExecutionPlan, WorkflowError> {
        let triggers: Vec<NodeId> = workflow
            .nodes
            .iter()
            .filter(|n| registry.is_trigger(&n.node_type))
            .map(|n| n.id.clone())
            .collect();

        if triggers.is_empty() {
            return Err(WorkflowError::NoTriggerNodes);
        }

        let graph = build_graph(workflow)?;
        let trigger_set: HashSet<&str> = triggers.iter().map(String::as_str).collect();

        for conn in &workflow.connections {
            if trigger_set.contains(conn.target_node_id.as_str()) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "{}.{} -> {}.{}: trigger nodes accept no inbound connections",
                    conn.source_node_id, conn.source_output, conn.target_node_id, conn.target_input
                )));
            }
        }

        if toposort(&graph.graph, None).is_err() {
            return Err(WorkflowError::CycleDetected);
        }

        let mut reachable = HashSet::new();
        for trigger in &triggers {
            let Some(&start) = graph.index.get(trigger.as_str()) else {
                continue;
            };
            let mut dfs = Dfs::new(&graph.graph, start);
            while let Some(idx) = dfs.next(&graph.graph) {
                reachable.insert(graph.graph[idx].to_string());
            }
        }

        let mut routes: HashMap<NodeId, Vec<Route>> = HashMap::new();
        let mut inbound: HashMap<NodeId, usize> = HashMap::new();
        for (connection_index, conn) in workflow.connections.iter().enumerate() {
            routes
                .entry(conn.source_node_id.clone())
                .or_default()
                .push(Route {
                    connection_index,
                    source_output: conn.source_output.clone(),
                    target_node_id: conn.target_node_id.clone(),
                    target_input: conn.target_input.clone(),
                });
            if reachable.contains(&conn.source_node_id) {
                *inbound.entry(conn.target_node_id.clone()).or_insert(0) += 1;
            }
        }

        tracing::debug!(
            "Resolved workflow {}: {} trigger(s), {}/{} nodes reachable",
            workflow.id,
            triggers.len(),
            reachable.len(),
            workflow.nodes.len()
        );

        Ok(ExecutionPlan {
            triggers,
            routes,
            inbound,
            reachable,
        })
    }
}

struct WorkflowGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

/// Build a dependency graph from the workflow
fn build_graph(workflow: &Workflow) -> Result<WorkflowGraph<'_>, WorkflowError> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    for node in &workflow.nodes {
        if index.contains_key(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNodeId(node.id.clone()));
        }
        let idx = graph.add_node(node.id.as_str());
        index.insert(node.id.as_str(), idx);
    }

    for conn in &workflow.connections {
        if conn.source_node_id == conn.target_node_id {
            return Err(WorkflowError::SelfLoop(conn.source_node_id.clone()));
        }
        let from_idx = index
            .get(conn.source_node_id.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(conn.source_node_id.clone()))?;
        let to_idx = index
            .get(conn.target_node_id.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(conn.target_node_id.clone()))?;

        graph.add_edge(*from_idx, *to_idx, ());
    }

    Ok(WorkflowGraph { graph, index })
}
