//! Deterministic nodes: pure functions of parent values.
//!
//! A deterministic node caches its value and recomputes it lazily when a
//! parent changes, following the same touch/keep/restore contract as a
//! stochastic node's probability. It is never clamped and never sampled.

use crate::error::GraphError;
use crate::value::{Value, ValueType};
use std::fmt;

/// The calculation a deterministic node performs over its parent values.
///
/// Arguments arrive in parent order. Implementations must be pure: the same
/// arguments always produce the same value.
pub trait NodeFunction: fmt::Debug + Send + Sync {
    /// Display name, e.g. `"add"`.
    fn name(&self) -> &'static str;

    /// Number of arguments the function expects.
    fn arity(&self) -> usize;

    fn evaluate(&self, args: &[Value]) -> Result<Value, GraphError>;

    fn clone_box(&self) -> Box<dyn NodeFunction>;
}

impl Clone for Box<dyn NodeFunction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Binary arithmetic over real-valued parents, the bread-and-butter derived
/// quantities of a model (sums of rates, scaled parameters, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy)]
pub struct ArithmeticFn {
    pub op: ArithmeticOp,
}

impl ArithmeticFn {
    pub fn new(op: ArithmeticOp) -> Self {
        Self { op }
    }
}

impl NodeFunction for ArithmeticFn {
    fn name(&self) -> &'static str {
        match self.op {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "subtract",
            ArithmeticOp::Multiply => "multiply",
            ArithmeticOp::Divide => "divide",
        }
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, GraphError> {
        let scalar = |v: &Value| {
            v.as_real().ok_or(GraphError::TypeMismatch {
                offered: v.value_type(),
                required: ValueType::Real,
            })
        };
        let l = scalar(&args[0])?;
        let r = scalar(&args[1])?;
        // Division by zero follows IEEE semantics; an infinite derived value
        // surfaces as a -inf log-density downstream.
        let out = match self.op {
            ArithmeticOp::Add => l + r,
            ArithmeticOp::Subtract => l - r,
            ArithmeticOp::Multiply => l * r,
            ArithmeticOp::Divide => l / r,
        };
        Ok(Value::Real(out))
    }

    fn clone_box(&self) -> Box<dyn NodeFunction> {
        Box::new(*self)
    }
}
