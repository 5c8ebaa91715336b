//! Typed variable handles over graph nodes.
//!
//! The front-end of a model-specification language binds names to nodes
//! through slots. A slot carries a required type; reads through it either
//! borrow the node's value directly or hand the caller a widened copy, so a
//! `Real`-typed slot can sit over an `Integer`-valued node without the node
//! ever changing representation.

use crate::error::GraphError;
use crate::graph::model::ModelGraph;
use crate::graph::node::NodeId;
use crate::value::{Value, ValueType};
use std::borrow::Cow;
use std::fmt::Write as _;

/// A lightweight handle on exactly one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    id: NodeId,
}

impl Variable {
    pub fn new(id: NodeId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name<'g>(&self, graph: &'g ModelGraph) -> &'g str {
        graph.name(self.id)
    }

    /// The node's current value, refreshed.
    pub fn value<'g>(&self, graph: &'g mut ModelGraph) -> Result<&'g Value, GraphError> {
        graph.get_value(self.id)
    }
}

/// A named, typed slot holding at most one variable.
#[derive(Debug, Clone)]
pub struct VariableSlot {
    label: String,
    required: ValueType,
    variable: Option<Variable>,
}

impl VariableSlot {
    pub fn new(label: &str, required: ValueType) -> Self {
        Self {
            label: label.to_string(),
            required,
            variable: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn required_type(&self) -> ValueType {
        self.required
    }

    pub fn variable(&self) -> Option<Variable> {
        self.variable
    }

    pub fn is_empty(&self) -> bool {
        self.variable.is_none()
    }

    /// Binds a variable, rejecting one whose current value cannot satisfy the
    /// slot type even after widening.
    pub fn set_variable(
        &mut self,
        variable: Variable,
        graph: &ModelGraph,
    ) -> Result<(), GraphError> {
        graph.check_id(variable.id())?;
        let value = graph.current_value(variable.id());
        if !value.is_convertible_to(self.required) {
            return Err(GraphError::TypeMismatch {
                offered: value.value_type(),
                required: self.required,
            });
        }
        self.variable = Some(variable);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.variable = None;
    }

    /// Reads the bound node through the slot's type: a borrow when the value
    /// already has the slot type, a widened copy otherwise.
    pub fn get_value<'g>(&self, graph: &'g mut ModelGraph) -> Result<Cow<'g, Value>, GraphError> {
        let variable = self.variable.ok_or(GraphError::KindMismatch {
            node: self.label.clone(),
            expected: "bound",
        })?;
        let value = graph.get_value(variable.id())?;
        if value.is_type(self.required) {
            Ok(Cow::Borrowed(value))
        } else {
            Ok(Cow::Owned(value.clone().convert_to(self.required)?))
        }
    }

    /// Renders as `<Type> label = value`, with `NULL` for an empty slot.
    pub fn describe(&self, graph: &ModelGraph) -> String {
        let mut out = String::new();
        let _ = write!(out, "<{}> {} = ", self.required, self.label);
        match self.variable {
            Some(v) => {
                let _ = write!(out, "{}", graph.current_value(v.id()));
            }
            None => out.push_str("NULL"),
        }
        out
    }
}
