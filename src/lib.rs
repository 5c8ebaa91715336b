//! vireo_core: the execution core of a Bayesian model-evaluation framework.
//!
//! A probabilistic model is a DAG of constant, deterministic, and stochastic
//! nodes. This crate provides the substrate an MCMC layer runs on: the node
//! arena with bidirectional edges ([`graph::ModelGraph`]), the
//! touch/keep/restore transaction protocol with lazy log-probability
//! recomputation, analytic variable elimination for discrete nodes, and
//! whole-graph cloning for independent parallel chains.
//!
//! Concrete distributions, proposal kernels, and any model-specification
//! front-end live in higher layers; the core only consumes the
//! [`dist::Distribution`] and [`graph::NodeFunction`] capabilities.

pub mod analysis;
pub mod display;
pub mod dist;
pub mod error;
pub mod graph;
pub mod value;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use error::GraphError;
pub use graph::{EvalMode, ModelGraph, NodeId, IMPOSSIBLE_LN_PROB};
pub use value::{Value, ValueType};
