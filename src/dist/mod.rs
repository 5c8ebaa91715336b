//! The polymorphic distribution capability consumed by stochastic nodes.
//!
//! Concrete densities live outside this crate; the core only needs a contract
//! it can evaluate, sample, and clone through. Parameter *values* are
//! resolved by the graph from the node's named parameter mapping and passed
//! here positionally, in `parameter_names()` order, which keeps the
//! capability free of graph references.

use crate::value::{Value, ValueType};
use rand::RngCore;
use std::fmt;

/// Density/sampling contract for a stochastic node.
pub trait Distribution: fmt::Debug + Send + Sync {
    /// Display name, e.g. `"norm"`.
    fn name(&self) -> &'static str;

    /// Labels of the distribution's parameters, in the positional order
    /// `ln_pdf` and `rv` expect their values.
    fn parameter_names(&self) -> &'static [&'static str];

    /// The type of the random variable this distribution produces.
    fn value_type(&self) -> ValueType;

    /// Log-density of `value` given the parameter values.
    fn ln_pdf(&self, params: &[Value], value: &Value) -> f64;

    /// Draws a fresh random value given the parameter values.
    fn rv(&self, params: &[Value], rng: &mut dyn RngCore) -> Value;

    fn clone_box(&self) -> Box<dyn Distribution>;

    /// Downcast to the discrete refinement, if this distribution has a
    /// finite, enumerable state space. Required for variable elimination.
    fn as_discrete(&self) -> Option<&dyn DiscreteDistribution> {
        None
    }
}

/// Refinement for distributions over a finite state space.
pub trait DiscreteDistribution: Distribution {
    /// Number of states, given the parameter values.
    fn state_count(&self, params: &[Value]) -> usize;

    /// The enumerated states, in a stable order. `states(p)[i]` corresponds
    /// to slot `i` of the per-state caches used during elimination.
    fn states(&self, params: &[Value]) -> Vec<Value>;
}

impl Clone for Box<dyn Distribution> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
