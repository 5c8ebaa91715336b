//! Distributions shared by the unit tests. Kept minimal on purpose: a
//! parameter-free discrete table, a parent-conditional table, and a Gaussian,
//! which between them exercise every contract the engine relies on.

use crate::dist::{DiscreteDistribution, Distribution};
use crate::value::{Value, ValueType};
use rand::{Rng, RngCore};

/// Discrete distribution over states `0..n` with fixed probabilities.
#[derive(Debug, Clone)]
pub struct TableDist {
    pub probs: Vec<f64>,
}

impl TableDist {
    pub fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }
}

impl Distribution for TableDist {
    fn name(&self) -> &'static str {
        "table"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn value_type(&self) -> ValueType {
        ValueType::Integer
    }

    fn ln_pdf(&self, _params: &[Value], value: &Value) -> f64 {
        match value.as_state_index() {
            Some(i) if i < self.probs.len() => self.probs[i].ln(),
            _ => f64::NEG_INFINITY,
        }
    }

    fn rv(&self, _params: &[Value], rng: &mut dyn RngCore) -> Value {
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (i, p) in self.probs.iter().enumerate() {
            acc += p;
            if u < acc {
                return Value::Integer(i as i64);
            }
        }
        Value::Integer(self.probs.len() as i64 - 1)
    }

    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }

    fn as_discrete(&self) -> Option<&dyn DiscreteDistribution> {
        Some(self)
    }
}

impl DiscreteDistribution for TableDist {
    fn state_count(&self, _params: &[Value]) -> usize {
        self.probs.len()
    }

    fn states(&self, _params: &[Value]) -> Vec<Value> {
        (0..self.probs.len() as i64).map(Value::Integer).collect()
    }
}

/// Discrete distribution conditioned on one discrete parent: row = parent
/// state, column = own state.
#[derive(Debug, Clone)]
pub struct CondTableDist {
    pub table: Vec<Vec<f64>>,
}

impl CondTableDist {
    pub fn new(table: Vec<Vec<f64>>) -> Self {
        Self { table }
    }
}

impl Distribution for CondTableDist {
    fn name(&self) -> &'static str {
        "cond_table"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["parent"]
    }

    fn value_type(&self) -> ValueType {
        ValueType::Integer
    }

    fn ln_pdf(&self, params: &[Value], value: &Value) -> f64 {
        let row = match params[0].as_state_index() {
            Some(r) if r < self.table.len() => r,
            _ => return f64::NEG_INFINITY,
        };
        match value.as_state_index() {
            Some(c) if c < self.table[row].len() => self.table[row][c].ln(),
            _ => f64::NEG_INFINITY,
        }
    }

    fn rv(&self, params: &[Value], rng: &mut dyn RngCore) -> Value {
        let row = params[0].as_state_index().unwrap_or(0).min(self.table.len() - 1);
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (i, p) in self.table[row].iter().enumerate() {
            acc += p;
            if u < acc {
                return Value::Integer(i as i64);
            }
        }
        Value::Integer(self.table[row].len() as i64 - 1)
    }

    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }

    fn as_discrete(&self) -> Option<&dyn DiscreteDistribution> {
        Some(self)
    }
}

impl DiscreteDistribution for CondTableDist {
    fn state_count(&self, _params: &[Value]) -> usize {
        self.table[0].len()
    }

    fn states(&self, _params: &[Value]) -> Vec<Value> {
        (0..self.table[0].len() as i64).map(Value::Integer).collect()
    }
}

/// Normal distribution with `mean` and `sd` parameter nodes.
#[derive(Debug, Clone, Copy)]
pub struct Gaussian;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

impl Distribution for Gaussian {
    fn name(&self) -> &'static str {
        "norm"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["mean", "sd"]
    }

    fn value_type(&self) -> ValueType {
        ValueType::Real
    }

    fn ln_pdf(&self, params: &[Value], value: &Value) -> f64 {
        let mean = params[0].as_real().unwrap_or(f64::NAN);
        let sd = params[1].as_real().unwrap_or(f64::NAN);
        let x = match value.as_real() {
            Some(x) => x,
            None => return f64::NEG_INFINITY,
        };
        if !(sd > 0.0) {
            return f64::NEG_INFINITY;
        }
        let z = (x - mean) / sd;
        -0.5 * z * z - sd.ln() - LN_SQRT_2PI
    }

    fn rv(&self, params: &[Value], rng: &mut dyn RngCore) -> Value {
        let mean = params[0].as_real().unwrap_or(0.0);
        let sd = params[1].as_real().unwrap_or(1.0);
        // Box-Muller.
        let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        Value::Real(mean + sd * z)
    }

    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(*self)
    }
}
