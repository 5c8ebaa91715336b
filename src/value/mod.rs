//! The owned datum held by a node, and its type descriptor.
//!
//! The evaluation core is value-polymorphic: a node's value may be a boolean
//! state, a discrete index, a real, or a real vector. Conversions are
//! widening only; anything else is a `TypeMismatch` surfaced to the caller
//! (clamping an observation, reading a typed slot).

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes the type a value has, or a slot/distribution requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Integer,
    Real,
    Vector,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Boolean => "Boolean",
            ValueType::Integer => "Integer",
            ValueType::Real => "Real",
            ValueType::Vector => "Vector",
        };
        write!(f, "{}", name)
    }
}

/// The atomic unit of data in the engine. Every node exclusively owns its
/// current value; snapshots are explicit moves into a named slot, never
/// aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Vector(Vec<f64>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::Vector(_) => ValueType::Vector,
        }
    }

    pub fn is_type(&self, required: ValueType) -> bool {
        self.value_type() == required
    }

    /// Whether a widening conversion to `required` exists.
    pub fn is_convertible_to(&self, required: ValueType) -> bool {
        if self.is_type(required) {
            return true;
        }
        matches!(
            (self.value_type(), required),
            (ValueType::Boolean, ValueType::Integer)
                | (ValueType::Boolean, ValueType::Real)
                | (ValueType::Integer, ValueType::Real)
                | (ValueType::Integer, ValueType::Vector)
                | (ValueType::Real, ValueType::Vector)
        )
    }

    /// Converts into `required`, consuming self. Identity conversions are
    /// free; everything else is widening. Fails with `TypeMismatch` naming
    /// both the offered and the required type.
    pub fn convert_to(self, required: ValueType) -> Result<Value, GraphError> {
        if self.is_type(required) {
            return Ok(self);
        }
        let offered = self.value_type();
        match (self, required) {
            (Value::Boolean(b), ValueType::Integer) => Ok(Value::Integer(b as i64)),
            (Value::Boolean(b), ValueType::Real) => Ok(Value::Real(b as i64 as f64)),
            (Value::Integer(i), ValueType::Real) => Ok(Value::Real(i as f64)),
            (Value::Integer(i), ValueType::Vector) => Ok(Value::Vector(vec![i as f64])),
            (Value::Real(r), ValueType::Vector) => Ok(Value::Vector(vec![r])),
            _ => Err(GraphError::TypeMismatch { offered, required }),
        }
    }

    /// Numeric view used by densities and deterministic functions. Booleans
    /// and integers widen; a vector has no scalar view.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Boolean(b) => Some(*b as i64 as f64),
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Vector(_) => None,
        }
    }

    /// Discrete-state view: the index of this value in a finite state space.
    pub fn as_state_index(&self) -> Option<usize> {
        match self {
            Value::Boolean(b) => Some(*b as usize),
            Value::Integer(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:.6}", r),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:.6}", x)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Boolean(true), ValueType::Integer, Value::Integer(1))]
    #[case(Value::Boolean(false), ValueType::Real, Value::Real(0.0))]
    #[case(Value::Integer(3), ValueType::Real, Value::Real(3.0))]
    #[case(Value::Integer(7), ValueType::Vector, Value::Vector(vec![7.0]))]
    #[case(Value::Real(2.5), ValueType::Vector, Value::Vector(vec![2.5]))]
    #[case(Value::Real(1.0), ValueType::Real, Value::Real(1.0))]
    fn widening_conversions(
        #[case] input: Value,
        #[case] target: ValueType,
        #[case] expected: Value,
    ) {
        assert!(input.is_convertible_to(target));
        assert_eq!(input.convert_to(target).unwrap(), expected);
    }

    #[rstest]
    #[case(Value::Real(1.5), ValueType::Integer)]
    #[case(Value::Vector(vec![1.0]), ValueType::Real)]
    #[case(Value::Integer(0), ValueType::Boolean)]
    fn narrowing_is_rejected(#[case] input: Value, #[case] target: ValueType) {
        let offered = input.value_type();
        let err = input.convert_to(target).unwrap_err();
        assert_eq!(
            err,
            GraphError::TypeMismatch {
                offered,
                required: target
            }
        );
    }

    #[test]
    fn state_index_views() {
        assert_eq!(Value::Boolean(true).as_state_index(), Some(1));
        assert_eq!(Value::Integer(4).as_state_index(), Some(4));
        assert_eq!(Value::Integer(-1).as_state_index(), None);
        assert_eq!(Value::Real(0.5).as_state_index(), None);
    }
}
