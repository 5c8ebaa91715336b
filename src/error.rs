//! Defines the error types for graph construction and evaluation.

use crate::value::ValueType;
use thiserror::Error;

/// Errors surfaced by the model graph.
///
/// All of these are local, synchronous failures at the call that triggered
/// them. The engine never retries or suppresses them; recovery, if any, is
/// the caller's responsibility.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Linking the requested edge would make the graph cyclic. The graph is
    /// left unchanged.
    #[error("Invalid assignment: cycles in the DAG (linking '{child}' under '{parent}')")]
    CycleDetected { parent: String, child: String },

    /// A proposal tried to change the value of an observed (clamped) node.
    #[error("Cannot change value of clamped node '{0}'")]
    ClampedNode(String),

    /// `clamp` was called while a proposal is pending on the node.
    #[error("Cannot clamp stochastic node '{0}' in volatile state")]
    VolatileState(String),

    /// A value was neither directly assignable nor convertible to the
    /// required type.
    #[error("Cannot use value of type '{offered}' where a '{required}' is required")]
    TypeMismatch {
        offered: ValueType,
        required: ValueType,
    },

    /// `swap_parent` was given a node that is not currently a parent.
    #[error("Node '{0}' is not a parent")]
    NotAParent(String),

    /// An operation was dispatched to a node of the wrong kind, e.g.
    /// `set_value` on a deterministic node.
    #[error("Node '{node}' is not a {expected} node")]
    KindMismatch {
        node: String,
        expected: &'static str,
    },

    /// A deterministic node was created or evaluated with the wrong number
    /// of arguments.
    #[error("Function '{function}' at node '{node}' expected {expected} arguments, got {actual}")]
    ArityMismatch {
        node: String,
        function: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A stochastic node was created without one of the distribution's
    /// declared parameters.
    #[error("Distribution '{distribution}' requires parameter '{required}'")]
    MissingParameter {
        distribution: &'static str,
        required: &'static str,
    },

    /// Summed ln-probability requested on an eliminated node with no factor
    /// root assigned. This indicates a structural bookkeeping defect in the
    /// caller, not a recoverable runtime condition.
    #[error("Summed ln-probability requested for '{0}' but no factor root is assigned")]
    MissingFactorRoot(String),

    /// The elimination machinery was asked to sum over a distribution with
    /// no finite state space.
    #[error("Cannot sum over node '{0}': its distribution has no finite state space")]
    NotDiscrete(String),

    /// A `NodeId` that does not name a node in this graph.
    #[error("Unknown node id {0}")]
    UnknownNode(u32),
}
