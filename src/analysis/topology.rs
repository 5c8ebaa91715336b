//! Topological ordering and reachability over the model graph.

use crate::error::GraphError;
use crate::graph::model::ModelGraph;
use crate::graph::node::NodeId;
use std::collections::{HashSet, VecDeque};

/// Topological sort via DFS post-order: every parent appears before its
/// children. Disconnected components are included; insertion order breaks
/// ties, so dumps are stable across runs.
///
/// The edge API keeps the graph acyclic, but the sort still detects a cycle
/// defensively rather than recursing forever.
pub fn sort(graph: &ModelGraph) -> Result<Vec<NodeId>, GraphError> {
    let count = graph.node_count();
    let mut order = Vec::with_capacity(count);
    let mut state = vec![VisitState::None; count];

    for i in 0..count {
        if state[i] == VisitState::None {
            visit(NodeId::new(i), graph, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

#[derive(Clone, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting,
    Visited,
}

fn visit(
    node: NodeId,
    graph: &ModelGraph,
    state: &mut Vec<VisitState>,
    order: &mut Vec<NodeId>,
) -> Result<(), GraphError> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => {
            return Err(GraphError::CycleDetected {
                parent: graph.name(node).to_string(),
                child: graph.name(node).to_string(),
            })
        }
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for &parent in graph.parents(node) {
        visit(parent, graph, state, order)?;
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    Ok(())
}

/// All nodes reachable downstream from `start_nodes`, including the starts.
/// The structural counterpart of the touch propagation: it ignores the
/// eliminated/instantiated stopping rule and reports raw reachability.
pub fn downstream_from(graph: &ModelGraph, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            for &child in graph.children(node) {
                queue.push_back(child);
            }
        }
    }
    visited
}
