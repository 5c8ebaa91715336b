//! Defines the node store types: identifiers, per-kind state, and the
//! transaction sentinel.

use crate::dist::Distribution;
use crate::graph::deterministic::NodeFunction;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A unique, stable identifier for a node within one `ModelGraph`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
    pub fn new(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An almost impossible value for a log-density. The stored ln-probability is
/// reset to this sentinel once `keep`/`restore` consumes it, so a stale read
/// of the snapshot is detectable.
pub const IMPOSSIBLE_LN_PROB: f64 = 1.0e6;

/// Whether a stochastic node holds a concrete value or is summed out
/// analytically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// The node has one specific value and contributes its own density.
    Instantiated,
    /// The node is summed over its state space; it contributes a factor to
    /// its factor root's summed likelihood instead of a density of its own.
    Eliminated,
}

/// Edges are index sets into the arena, never owning references. Four inline
/// slots cover the typical parameter count without allocation.
pub type EdgeSet = SmallVec<[NodeId; 4]>;

/// A node in the model graph. The parent/child sets are kept mutually
/// consistent by the `ModelGraph` edge API.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) parents: EdgeSet,
    pub(crate) children: EdgeSet,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(name: String, kind: NodeKind) -> Self {
        Self {
            name,
            parents: EdgeSet::new(),
            children: EdgeSet::new(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Constant(_) => "constant",
            NodeKind::Deterministic(_) => "deterministic",
            NodeKind::Stochastic(_) => "stochastic",
        }
    }
}

/// The per-kind state of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A fixed input value. No parents, no transaction state.
    Constant(Value),
    /// A pure function of the parent values, recomputed lazily.
    Deterministic(DeterministicCore),
    /// A random quantity with an associated distribution.
    Stochastic(StochasticCore),
}

/// State of a deterministic node.
#[derive(Debug, Clone)]
pub struct DeterministicCore {
    pub(crate) func: Box<dyn NodeFunction>,
    /// Argument nodes in call order. Distinct from the parent edge set: the
    /// same parent may appear in several argument positions.
    pub(crate) args: Vec<NodeId>,
    /// Cached value; valid when `needs_update` is false.
    pub(crate) value: Value,
    /// Snapshot taken at the first touch of the current transaction.
    pub(crate) stored_value: Option<Value>,
    pub(crate) touched: bool,
    pub(crate) needs_update: bool,
}

/// State of a stochastic node: value, probability, and the transaction
/// machine.
#[derive(Debug, Clone)]
pub struct StochasticCore {
    pub(crate) dist: Box<dyn Distribution>,
    /// Named parameter mapping, label to parameter node, in the
    /// distribution's declared order.
    pub(crate) params: Vec<(String, NodeId)>,

    /// Exclusively owned current value.
    pub(crate) value: Value,
    /// Owned only while touched; set by the first `set_value` of the
    /// transaction (or by a value-preserving touch).
    pub(crate) stored_value: Option<Value>,

    pub(crate) ln_prob: f64,
    /// Valid only while touched; `IMPOSSIBLE_LN_PROB` otherwise.
    pub(crate) stored_ln_prob: f64,

    pub(crate) touched: bool,
    pub(crate) clamped: bool,
    pub(crate) needs_recalculation: bool,

    pub(crate) mode: EvalMode,
    /// Nearest eliminated ancestor's factor root, or this node itself when
    /// it heads an eliminated chain. `None` for ordinary instantiated nodes.
    pub(crate) factor_root: Option<NodeId>,

    /// Per-state log-joint cache, sized to the state space while eliminated.
    pub(crate) probabilities: Vec<f64>,
    /// Per-state, per-child likelihood memo while eliminated.
    pub(crate) likelihoods: Vec<Vec<f64>>,
    pub(crate) stored_probabilities: Vec<f64>,
    pub(crate) stored_likelihoods: Vec<Vec<f64>>,
}

impl StochasticCore {
    pub(crate) fn new(
        dist: Box<dyn Distribution>,
        params: Vec<(String, NodeId)>,
        value: Value,
    ) -> Self {
        Self {
            dist,
            params,
            value,
            stored_value: None,
            ln_prob: 0.0,
            stored_ln_prob: IMPOSSIBLE_LN_PROB,
            touched: false,
            clamped: false,
            needs_recalculation: true,
            mode: EvalMode::Instantiated,
            factor_root: None,
            probabilities: Vec::new(),
            likelihoods: Vec::new(),
            stored_probabilities: Vec::new(),
            stored_likelihoods: Vec::new(),
        }
    }
}
