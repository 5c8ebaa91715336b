//! Human-readable dumps of graph structure and node state.
//!
//! These formats are diagnostic output, not a stable interface: field order
//! and wording may change between versions.

use crate::analysis::topology;
use crate::error::GraphError;
use crate::graph::model::ModelGraph;
use crate::graph::node::{NodeId, NodeKind};
use std::fmt::Write as _;

fn name_list(graph: &ModelGraph, ids: &[NodeId]) -> String {
    let names: Vec<&str> = ids.iter().map(|&id| graph.name(id)).collect();
    format!("[ {} ]", names.join(", "))
}

/// Full struct dump of one node, one `_field = value` line per field,
/// matching what an interactive `str(node)` would show.
pub fn print_struct(graph: &ModelGraph, id: NodeId) -> Result<String, GraphError> {
    graph.check_id(id)?;
    let node = graph.node(id);
    let mut out = String::new();

    writeln!(out, "_variable     = {}", node.name()).ok();
    writeln!(out, "_class        = {}", node.kind_name()).ok();

    match &node.kind {
        NodeKind::Constant(value) => {
            writeln!(out, "_type         = {}", value.value_type()).ok();
            writeln!(out, "_value        = {}", value).ok();
        }
        NodeKind::Deterministic(core) => {
            writeln!(out, "_function     = {}", core.func.name()).ok();
            writeln!(out, "_touched      = {}", core.touched).ok();
            writeln!(out, "_needsUpdate  = {}", core.needs_update).ok();
            writeln!(out, "_type         = {}", core.value.value_type()).ok();
            writeln!(out, "_value        = {}", core.value).ok();
            if let Some(stored) = &core.stored_value {
                writeln!(out, "_storedValue  = {}", stored).ok();
            }
        }
        NodeKind::Stochastic(core) => {
            writeln!(out, "_distribution = {}", core.dist.name()).ok();
            writeln!(out, "_touched      = {}", core.touched).ok();
            writeln!(out, "_clamped      = {}", core.clamped).ok();
            writeln!(out, "_mode         = {:?}", core.mode).ok();
            writeln!(out, "_type         = {}", core.value.value_type()).ok();
            writeln!(out, "_value        = {}", core.value).ok();
            writeln!(out, "_lnProb       = {}", core.ln_prob).ok();
            if core.touched {
                if let Some(stored) = &core.stored_value {
                    writeln!(out, "_storedValue  = {}", stored).ok();
                }
                writeln!(out, "_storedLnProb = {}", core.stored_ln_prob).ok();
            }
            if let Some(root) = core.factor_root {
                writeln!(out, "_factorRoot   = {}", graph.name(root)).ok();
            }
        }
    }

    writeln!(out, "_parents      = {}", name_list(graph, graph.parents(id))).ok();
    writeln!(out, "_children     = {}", name_list(graph, graph.children(id))).ok();
    Ok(out)
}

/// One-line summary of a node, for interleaving into logs.
pub fn debug_info(graph: &ModelGraph, id: NodeId) -> Result<String, GraphError> {
    graph.check_id(id)?;
    let node = graph.node(id);
    let mut out = String::new();
    write!(out, "{} ({})", node.name(), node.kind_name()).ok();
    match &node.kind {
        NodeKind::Constant(value) => {
            write!(out, " = {}", value).ok();
        }
        NodeKind::Deterministic(core) => {
            write!(out, " = {}", core.value).ok();
            if core.touched {
                out.push_str(" [touched]");
            }
        }
        NodeKind::Stochastic(core) => {
            write!(out, " ~ {} = {} (lnProb {})", core.dist.name(), core.value, core.ln_prob).ok();
            if core.touched {
                out.push_str(" [touched]");
            }
            if core.clamped {
                out.push_str(" [clamped]");
            }
        }
    }
    Ok(out)
}

/// JSON summary of the whole graph: names, kinds, and edges, in topological
/// order.
pub fn structure_json(graph: &ModelGraph) -> Result<String, GraphError> {
    let order = topology::sort(graph)?;
    let nodes: Vec<serde_json::Value> = order
        .iter()
        .map(|&id| {
            let node = graph.node(id);
            serde_json::json!({
                "name": node.name(),
                "kind": node.kind_name(),
                "parents": graph.parents(id).iter().map(|&p| graph.name(p)).collect::<Vec<_>>(),
                "children": graph.children(id).iter().map(|&c| graph.name(c)).collect::<Vec<_>>(),
            })
        })
        .collect();

    let doc = serde_json::json!({
        "node_count": graph.node_count(),
        "nodes": nodes,
    });
    // json! output over plain data cannot fail to serialize.
    Ok(serde_json::to_string_pretty(&doc).expect("BUG: structure summary not serializable"))
}
