//! The node arena and structural graph operations.
//!
//! Nodes live in a dense `Vec` keyed by `NodeId`; edges are index sets held
//! on both endpoints. Every edge mutation goes through this module so the
//! bidirectional invariant (A lists B as parent iff B lists A as child) and
//! the acyclicity invariant hold after every call.

use crate::dist::Distribution;
use crate::error::GraphError;
use crate::graph::deterministic::NodeFunction;
use crate::graph::node::{DeterministicCore, Node, NodeId, NodeKind, StochasticCore};
use crate::value::Value;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::collections::{HashMap, HashSet};

const DEFAULT_SEED: u64 = 0x5eed_cafe;

/// A probabilistic model as a DAG of constant, deterministic, and stochastic
/// nodes. Self-contained: cloning the graph yields a fully independent model
/// suitable for a separate chain.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    pub(crate) nodes: Vec<Node>,
    used_names: HashSet<String>,
    rng: Pcg64,
}

impl Default for ModelGraph {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            used_names: HashSet::new(),
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Replaces the RNG stream, e.g. to give each cloned chain its own.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Pcg64::seed_from_u64(seed);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn check_id(&self, id: NodeId) -> Result<(), GraphError> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id.0))
        }
    }

    #[inline(always)]
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline(always)]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    /// Looks a node up by its (unique) name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(NodeId::new)
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).parents
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    // --- Construction ---

    /// Inserts a node, enforcing unique names. An empty name is
    /// auto-generated from the node's index.
    pub(crate) fn push_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());

        let base = if node.name.is_empty() {
            format!("node_{}", id.0)
        } else {
            node.name.clone()
        };
        let mut candidate = base.clone();
        let mut counter = 1;
        while self.used_names.contains(&candidate) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        self.used_names.insert(candidate.clone());
        node.name = candidate;

        self.nodes.push(node);
        id
    }

    pub fn add_constant(&mut self, name: &str, value: Value) -> NodeId {
        self.push_node(Node::new(name.to_string(), NodeKind::Constant(value)))
    }

    /// Creates a deterministic node computing `func` over `args` (in order)
    /// and wires it into the graph. The initial value is computed eagerly.
    pub fn add_deterministic(
        &mut self,
        name: &str,
        func: Box<dyn NodeFunction>,
        args: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        for &a in args {
            self.check_id(a)?;
        }
        if args.len() != func.arity() {
            return Err(GraphError::ArityMismatch {
                node: name.to_string(),
                function: func.name(),
                expected: func.arity(),
                actual: args.len(),
            });
        }

        let mut arg_values = Vec::with_capacity(args.len());
        for &a in args {
            self.refresh(a)?;
            arg_values.push(self.current_value(a).clone());
        }
        let value = func.evaluate(&arg_values)?;

        let core = DeterministicCore {
            func,
            args: args.to_vec(),
            value,
            stored_value: None,
            touched: false,
            needs_update: false,
        };
        let id = self.push_node(Node::new(name.to_string(), NodeKind::Deterministic(core)));
        for &a in args {
            self.link_edge(id, a);
        }
        Ok(id)
    }

    /// Creates a stochastic node from a distribution and its named parameter
    /// nodes. Registers both edge directions, draws the initial value from
    /// the distribution, and computes the initial log-probability.
    pub fn add_stochastic(
        &mut self,
        name: &str,
        dist: Box<dyn Distribution>,
        params: &[(&str, NodeId)],
    ) -> Result<NodeId, GraphError> {
        // Order the supplied parameters by the distribution's declaration.
        let mut ordered: Vec<(String, NodeId)> = Vec::with_capacity(dist.parameter_names().len());
        for &required in dist.parameter_names() {
            let found = params.iter().find(|(label, _)| *label == required);
            match found {
                Some(&(label, pid)) => {
                    self.check_id(pid)?;
                    ordered.push((label.to_string(), pid));
                }
                None => {
                    return Err(GraphError::MissingParameter {
                        distribution: dist.name(),
                        required,
                    })
                }
            }
        }

        let mut param_values = Vec::with_capacity(ordered.len());
        for (_, pid) in &ordered {
            self.refresh(*pid)?;
            param_values.push(self.current_value(*pid).clone());
        }

        // We use a random draw as the initial value.
        let value = dist.rv(&param_values, &mut self.rng);
        let ln_prob = dist.ln_pdf(&param_values, &value);

        let param_ids: Vec<NodeId> = ordered.iter().map(|(_, pid)| *pid).collect();
        let mut core = StochasticCore::new(dist, ordered, value);
        core.ln_prob = ln_prob;
        core.needs_recalculation = false;

        let id = self.push_node(Node::new(name.to_string(), NodeKind::Stochastic(core)));
        for pid in param_ids {
            self.link_edge(id, pid);
        }
        Ok(id)
    }

    // --- Edge API ---

    /// Installs `parent` as a parent of `child`, both directions. Fails with
    /// `CycleDetected` (leaving the graph unchanged) if `child` is already
    /// an ancestor of `parent`. Installing an existing edge is a no-op.
    pub fn add_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), GraphError> {
        self.check_id(child)?;
        self.check_id(parent)?;
        if self.node(child).parents.contains(&parent) {
            return Ok(());
        }
        if child == parent || self.is_ancestor_of(child, parent) {
            return Err(GraphError::CycleDetected {
                parent: self.name(parent).to_string(),
                child: self.name(child).to_string(),
            });
        }
        self.link_edge(child, parent);
        Ok(())
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.add_parent(child, parent)
    }

    /// Removes the edge in both directions. Removing an absent edge is a
    /// no-op (teardown may unlink twice).
    pub fn remove_parent(&mut self, child: NodeId, parent: NodeId) {
        if child.index() >= self.nodes.len() || parent.index() >= self.nodes.len() {
            return;
        }
        self.node_mut(child).parents.retain(|&mut p| p != parent);
        self.node_mut(parent).children.retain(|&mut c| c != child);
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.remove_parent(child, parent);
    }

    /// Raw bidirectional insertion, no cycle check. Callers must have
    /// established acyclicity.
    pub(crate) fn link_edge(&mut self, child: NodeId, parent: NodeId) {
        if !self.node(child).parents.contains(&parent) {
            self.node_mut(child).parents.push(parent);
            self.node_mut(parent).children.push(child);
        }
    }

    /// Depth-first reachability: is `candidate` among the ancestors of `of`?
    /// Used before linking a new parent to guarantee the DAG invariant.
    pub fn is_ancestor_of(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut visited = HashSet::new();
        self.ancestor_dfs(candidate, of, &mut visited)
    }

    fn ancestor_dfs(&self, candidate: NodeId, at: NodeId, visited: &mut HashSet<NodeId>) -> bool {
        for &p in &self.node(at).parents {
            if p == candidate {
                return true;
            }
            if visited.insert(p) && self.ancestor_dfs(candidate, p, visited) {
                return true;
            }
        }
        false
    }

    // --- Value access ---

    /// The node's current value, possibly in-flux during a proposal and
    /// possibly stale for a dirty deterministic node. Use `get_value` to
    /// pull a fresh one.
    pub fn current_value(&self, id: NodeId) -> &Value {
        match &self.node(id).kind {
            NodeKind::Constant(v) => v,
            NodeKind::Deterministic(core) => &core.value,
            NodeKind::Stochastic(core) => &core.value,
        }
    }

    /// Current value with dirty deterministic ancestors recomputed first.
    pub fn get_value(&mut self, id: NodeId) -> Result<&Value, GraphError> {
        self.check_id(id)?;
        self.refresh(id)?;
        Ok(self.current_value(id))
    }

    /// The pre-proposal value while the node is touched, the current value
    /// otherwise.
    pub fn get_stored_value(&self, id: NodeId) -> &Value {
        match &self.node(id).kind {
            NodeKind::Constant(v) => v,
            NodeKind::Deterministic(core) => {
                if core.touched {
                    core.stored_value.as_ref().unwrap_or(&core.value)
                } else {
                    &core.value
                }
            }
            NodeKind::Stochastic(core) => {
                if core.touched {
                    core.stored_value.as_ref().unwrap_or(&core.value)
                } else {
                    &core.value
                }
            }
        }
    }

    /// Recomputes a dirty deterministic node (and its dirty deterministic
    /// ancestors) from its argument values. No-op for other kinds. The
    /// argument list, not the deduplicated parent edge set, drives the call.
    pub(crate) fn refresh(&mut self, id: NodeId) -> Result<(), GraphError> {
        let arg_ids: Vec<NodeId> = match &self.node(id).kind {
            NodeKind::Deterministic(core) if core.needs_update => core.args.clone(),
            _ => return Ok(()),
        };
        for &a in &arg_ids {
            self.refresh(a)?;
        }
        let args: Vec<Value> = arg_ids
            .iter()
            .map(|&a| self.current_value(a).clone())
            .collect();

        let node = self.node_mut(id);
        if let NodeKind::Deterministic(core) = &mut node.kind {
            core.value = core.func.evaluate(&args)?;
            core.needs_update = false;
        }
        Ok(())
    }

    /// Resolves the parameter values of a stochastic node, in declared
    /// order, refreshing deterministic parameters on the way.
    pub(crate) fn resolve_params(&mut self, id: NodeId) -> Result<Vec<Value>, GraphError> {
        let param_ids: Vec<NodeId> = match &self.node(id).kind {
            NodeKind::Stochastic(core) => core.params.iter().map(|(_, pid)| *pid).collect(),
            _ => Vec::new(),
        };
        let mut values = Vec::with_capacity(param_ids.len());
        for pid in param_ids {
            self.refresh(pid)?;
            values.push(self.current_value(pid).clone());
        }
        Ok(values)
    }

    // --- Graph clone engine ---

    /// Returns the clone of `id` in `dest`, creating it if absent from
    /// `memo`: pristine copy first, then parents, then children, so the
    /// whole reachable graph is duplicated exactly once per node regardless
    /// of traversal order. Parameter mappings and factor roots are remapped
    /// through the memo; no clone shares value storage with the original.
    pub fn clone_dag(
        &self,
        id: NodeId,
        dest: &mut ModelGraph,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> Result<NodeId, GraphError> {
        self.check_id(id)?;
        Ok(self.clone_dag_inner(id, dest, memo))
    }

    fn clone_dag_inner(
        &self,
        id: NodeId,
        dest: &mut ModelGraph,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        if let Some(&copy) = memo.get(&id) {
            return copy;
        }

        // Pristine copy: full state, no edges yet.
        let mut pristine = self.node(id).clone();
        pristine.parents.clear();
        pristine.children.clear();
        let copy = dest.push_node(pristine);
        memo.insert(id, copy);

        // Parents first; a shared ancestor is cloned once through the memo.
        let parents: Vec<NodeId> = self.node(id).parents.to_vec();
        for &p in &parents {
            let p_copy = self.clone_dag_inner(p, dest, memo);
            dest.link_edge(copy, p_copy);
        }

        // Remap ancestor references. All of them are parents, which the
        // recursion above has already cloned.
        match &mut dest.node_mut(copy).kind {
            NodeKind::Stochastic(core) => {
                for (_, pid) in core.params.iter_mut() {
                    *pid = *memo
                        .get(pid)
                        .expect("BUG: parameter node not cloned with its parents");
                }
                if let Some(root) = core.factor_root {
                    core.factor_root = Some(
                        *memo
                            .get(&root)
                            .expect("BUG: factor root not reachable through parents"),
                    );
                }
            }
            NodeKind::Deterministic(core) => {
                for a in core.args.iter_mut() {
                    *a = *memo
                        .get(a)
                        .expect("BUG: argument node not cloned with its parents");
                }
            }
            NodeKind::Constant(_) => {}
        }

        // Make sure the children clone themselves.
        let children: Vec<NodeId> = self.node(id).children.to_vec();
        for &c in &children {
            self.clone_dag_inner(c, dest, memo);
        }

        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::deterministic::{ArithmeticFn, ArithmeticOp};
    use crate::testing::{CondTableDist, Gaussian, TableDist};

    fn add_fn() -> Box<ArithmeticFn> {
        Box::new(ArithmeticFn::new(ArithmeticOp::Add))
    }

    #[test]
    fn edges_are_registered_in_both_directions() {
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", Value::Real(0.0));
        let sd = g.add_constant("sd", Value::Real(1.0));
        let x = g
            .add_stochastic("x", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();

        assert_eq!(g.parents(x), &[mu, sd]);
        assert_eq!(g.children(mu), &[x]);
        assert_eq!(g.children(sd), &[x]);
    }

    #[test]
    fn stochastic_creation_draws_and_scores_an_initial_value() {
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", Value::Real(0.0));
        let sd = g.add_constant("sd", Value::Real(1.0));
        let x = g
            .add_stochastic("x", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();

        let v = g.current_value(x).as_real().unwrap();
        let expected = Gaussian.ln_pdf(
            &[Value::Real(0.0), Value::Real(1.0)],
            &Value::Real(v),
        );
        assert_eq!(g.ln_probability(x).unwrap(), expected);
        assert!(!g.is_dirty(x));
    }

    #[test]
    fn missing_parameter_is_rejected() {
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", Value::Real(0.0));
        let err = g
            .add_stochastic("x", Box::new(Gaussian), &[("mean", mu)])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingParameter {
                distribution: "norm",
                required: "sd",
            }
        );
    }

    #[test]
    fn names_are_unique_and_auto_generated() {
        let mut g = ModelGraph::new();
        let a = g.add_constant("x", Value::Real(1.0));
        let b = g.add_constant("x", Value::Real(2.0));
        let c = g.add_constant("", Value::Real(3.0));

        assert_eq!(g.name(a), "x");
        assert_eq!(g.name(b), "x_1");
        assert_eq!(g.name(c), "node_2");
        assert_eq!(g.find("x_1"), Some(b));
    }

    #[test]
    fn cycle_creating_edge_is_rejected_and_graph_unchanged() {
        let mut g = ModelGraph::new();
        let a = g.add_constant("a", Value::Real(1.0));
        let b = g.add_deterministic("b", add_fn(), &[a, a]).unwrap();
        let c = g.add_deterministic("c", add_fn(), &[b, b]).unwrap();

        let err = g.add_parent(a, c).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                parent: "c".to_string(),
                child: "a".to_string(),
            }
        );
        assert!(g.parents(a).is_empty());
        assert!(g.children(c).is_empty());

        // Self-edges count as cycles too.
        assert!(matches!(
            g.add_parent(b, b),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn redundant_and_absent_edge_operations_are_no_ops() {
        let mut g = ModelGraph::new();
        let a = g.add_constant("a", Value::Real(1.0));
        let b = g.add_deterministic("b", add_fn(), &[a, a]).unwrap();

        g.add_parent(b, a).unwrap();
        assert_eq!(g.parents(b).iter().filter(|&&p| p == a).count(), 1);

        g.remove_parent(b, a);
        g.remove_parent(b, a);
        assert!(g.parents(b).is_empty());
        assert!(g.children(a).is_empty());
    }

    #[test]
    fn deterministic_values_refresh_lazily() {
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", Value::Real(0.0));
        let sd = g.add_constant("sd", Value::Real(1.0));
        let m = g
            .add_stochastic("m", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();
        let d = g.add_deterministic("d", add_fn(), &[m, m]).unwrap();

        g.set_value(m, Value::Real(2.0)).unwrap();
        // Stale until read.
        assert!(g.is_dirty(d));
        assert_eq!(*g.get_value(d).unwrap(), Value::Real(4.0));
        assert!(!g.is_dirty(d));
        g.keep(m).unwrap();
    }

    // --- Cloning ---

    fn diamond() -> (ModelGraph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = ModelGraph::new();
        let a = g
            .add_stochastic("a", Box::new(TableDist::new(vec![0.4, 0.6])), &[])
            .unwrap();
        let b = g
            .add_stochastic(
                "b",
                Box::new(CondTableDist::new(vec![vec![0.9, 0.1], vec![0.2, 0.8]])),
                &[("parent", a)],
            )
            .unwrap();
        let c = g
            .add_stochastic(
                "c",
                Box::new(CondTableDist::new(vec![vec![0.5, 0.5], vec![0.3, 0.7]])),
                &[("parent", a)],
            )
            .unwrap();
        let d = g.add_deterministic("d", add_fn(), &[b, c]).unwrap();
        (g, a, b, c, d)
    }

    #[test]
    fn diamond_clones_to_exactly_four_nodes() {
        let (g, a, _b, _c, d) = diamond();
        let mut dest = ModelGraph::new();
        let mut memo = HashMap::new();
        let d_copy = g.clone_dag(d, &mut dest, &mut memo).unwrap();

        assert_eq!(dest.node_count(), 4);
        assert_eq!(memo.len(), 4);

        // The shared ancestor is one node, reached twice.
        let a_copy = memo[&a];
        assert_eq!(dest.children(a_copy).len(), 2);
        assert_eq!(dest.parents(d_copy).len(), 2);
        assert_eq!(dest.name(a_copy), "a");
    }

    #[test]
    fn clones_share_no_state_with_the_original() {
        let (g, a, b, _c, _d) = diamond();
        let mut dest = ModelGraph::new();
        let mut memo = HashMap::new();
        g.clone_dag(a, &mut dest, &mut memo).unwrap();

        let a_copy = memo[&a];
        let b_copy = memo[&b];
        let original_a = g.current_value(a).clone();

        // Parameter mappings point into the clone, not the original.
        assert_eq!(dest.parameters(b_copy)[0].1, a_copy);

        let mut dest2 = dest;
        let flipped = match original_a {
            Value::Integer(i) => Value::Integer(1 - i),
            _ => unreachable!(),
        };
        dest2.set_value(a_copy, flipped).unwrap();
        dest2.keep(a_copy).unwrap();
        assert_eq!(*g.current_value(a), original_a);
    }

    #[test]
    fn clone_remaps_factor_roots() {
        let (mut g, a, b, _c, _d) = diamond();
        g.set_instantiated(a, false).unwrap();
        g.set_instantiated(b, false).unwrap();

        let mut dest = ModelGraph::new();
        let mut memo = HashMap::new();
        g.clone_dag(b, &mut dest, &mut memo).unwrap();

        assert_eq!(dest.factor_root(memo[&a]), Some(memo[&a]));
        assert_eq!(dest.factor_root(memo[&b]), Some(memo[&a]));
    }

    #[test]
    fn whole_graph_clone_preserves_ids_and_isolates_rng() {
        let mut g = ModelGraph::new();
        let mu = g.add_constant("mu", Value::Real(0.0));
        let sd = g.add_constant("sd", Value::Real(1.0));
        let x = g
            .add_stochastic("x", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();

        let mut copy = g.clone();
        copy.reseed(99);
        assert_eq!(copy.name(x), "x");
        assert_eq!(copy.current_value(x), g.current_value(x));

        let y1 = g
            .add_stochastic("y", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();
        let y2 = copy
            .add_stochastic("y", Box::new(Gaussian), &[("mean", mu), ("sd", sd)])
            .unwrap();
        assert_ne!(g.current_value(y1), copy.current_value(y2));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let g = ModelGraph::new();
        assert_eq!(
            g.check_id(NodeId::new(3)).unwrap_err(),
            GraphError::UnknownNode(3)
        );
    }

    #[test]
    fn kind_mismatch_is_reported_by_name() {
        let mut g = ModelGraph::new();
        let c = g.add_constant("k", Value::Real(1.0));
        let err = g.set_value(c, Value::Real(2.0)).unwrap_err();
        assert_eq!(
            err,
            GraphError::KindMismatch {
                node: "k".to_string(),
                expected: "stochastic",
            }
        );
    }
}
