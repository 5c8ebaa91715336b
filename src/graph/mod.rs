//! The model graph: arena storage, node kinds, and the evaluation engine.

pub mod deterministic;
pub mod model;
pub mod node;
pub mod stochastic;

pub use deterministic::{ArithmeticFn, ArithmeticOp, NodeFunction};
pub use model::ModelGraph;
pub use node::{EvalMode, Node, NodeId, NodeKind, IMPOSSIBLE_LN_PROB};
