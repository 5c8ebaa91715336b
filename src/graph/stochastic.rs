//! The stochastic node state machine and the probability calculus.
//!
//! A stochastic node rests in `Clean` and enters `Touched` when a proposal
//! changes it (directly or through a parent). While touched it carries a
//! snapshot of the pre-proposal log-probability (and value, once one is
//! replaced); exactly one of `keep`/`restore` ends the transaction. The
//! stored log-probability is reset to `IMPOSSIBLE_LN_PROB` on consumption so
//! stale reads are detectable.

use crate::error::GraphError;
use crate::graph::model::ModelGraph;
use crate::graph::node::{EvalMode, NodeId, NodeKind, StochasticCore, IMPOSSIBLE_LN_PROB};
use crate::value::Value;
use std::collections::BTreeSet;
use std::mem;

impl ModelGraph {
    pub(crate) fn stochastic(&self, id: NodeId) -> Result<&StochasticCore, GraphError> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => Ok(core),
            _ => Err(GraphError::KindMismatch {
                node: self.name(id).to_string(),
                expected: "stochastic",
            }),
        }
    }

    pub(crate) fn stochastic_mut(&mut self, id: NodeId) -> Result<&mut StochasticCore, GraphError> {
        if !matches!(self.node(id).kind, NodeKind::Stochastic(_)) {
            return Err(GraphError::KindMismatch {
                node: self.name(id).to_string(),
                expected: "stochastic",
            });
        }
        match &mut self.node_mut(id).kind {
            NodeKind::Stochastic(core) => Ok(core),
            _ => unreachable!(),
        }
    }

    // --- Flags and accessors ---

    pub fn is_touched(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::Constant(_) => false,
            NodeKind::Deterministic(core) => core.touched,
            NodeKind::Stochastic(core) => core.touched,
        }
    }

    /// Whether the node's cached value/probability is pending recomputation.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::Constant(_) => false,
            NodeKind::Deterministic(core) => core.needs_update,
            NodeKind::Stochastic(core) => core.needs_recalculation,
        }
    }

    pub fn is_clamped(&self, id: NodeId) -> bool {
        matches!(&self.node(id).kind, NodeKind::Stochastic(core) if core.clamped)
    }

    pub fn is_eliminated(&self, id: NodeId) -> bool {
        matches!(
            &self.node(id).kind,
            NodeKind::Stochastic(core) if core.mode == EvalMode::Eliminated
        )
    }

    pub fn eval_mode(&self, id: NodeId) -> Option<EvalMode> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => Some(core.mode),
            _ => None,
        }
    }

    pub fn factor_root(&self, id: NodeId) -> Option<NodeId> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => core.factor_root,
            _ => None,
        }
    }

    /// Cached log-probability, without recomputation.
    pub fn ln_probability(&self, id: NodeId) -> Option<f64> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => Some(core.ln_prob),
            _ => None,
        }
    }

    /// Snapshot log-probability; `IMPOSSIBLE_LN_PROB` outside a transaction.
    pub fn stored_ln_probability(&self, id: NodeId) -> Option<f64> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => Some(core.stored_ln_prob),
            _ => None,
        }
    }

    /// The named parameter mapping of a stochastic node.
    pub fn parameters(&self, id: NodeId) -> &[(String, NodeId)] {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => &core.params,
            _ => &[],
        }
    }

    pub fn distribution(&self, id: NodeId) -> Option<&dyn crate::dist::Distribution> {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => Some(core.dist.as_ref()),
            _ => None,
        }
    }

    // --- The transaction protocol ---

    /// Marks the node for recalculation, snapshotting its pre-proposal state
    /// on the first touch of the transaction, and propagates downstream:
    /// every child is touched, and the recursion continues through
    /// deterministic and eliminated nodes (instantiated stochastic children
    /// self-report through their own probability delta).
    pub fn touch(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.touch_me(id);
        self.touch_affected(id);
        Ok(())
    }

    /// Commits the pending change: discards the snapshot, resets the stored
    /// log-probability to the sentinel, and recomputes the probability if
    /// still dirty. Propagates with the same stopping rule as `touch`, so
    /// one call resolves the whole affected set of a proposal.
    pub fn keep(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.keep_me(id)?;
        self.keep_affected(id)?;
        Ok(())
    }

    /// Rolls the pending change back: the snapshot becomes current again and
    /// the known-good probability returns without recomputation. Propagates
    /// like `keep`.
    pub fn restore(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.restore_me(id);
        self.restore_affected(id);
        Ok(())
    }

    /// Whether the touch/keep/restore recursion passes through this node
    /// into its children.
    fn propagation_continues(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::Constant(_) => false,
            NodeKind::Deterministic(_) => true,
            NodeKind::Stochastic(core) => core.mode == EvalMode::Eliminated,
        }
    }

    pub(crate) fn touch_me(&mut self, id: NodeId) {
        match &mut self.node_mut(id).kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(core) => {
                if !core.touched {
                    core.touched = true;
                    core.stored_value = Some(core.value.clone());
                }
                core.needs_update = true;
            }
            NodeKind::Stochastic(core) => {
                // Idempotent: the snapshot reflects the state at the start
                // of the proposal, never an intermediate one.
                if !core.touched {
                    core.touched = true;
                    core.stored_ln_prob = core.ln_prob;
                    if core.mode == EvalMode::Eliminated {
                        core.stored_probabilities = core.probabilities.clone();
                        core.stored_likelihoods = core.likelihoods.clone();
                    }
                }
                core.needs_recalculation = true;
            }
        }
    }

    pub(crate) fn touch_affected(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.node(id).children.to_vec();
        for c in children {
            let was_touched = self.is_touched(c);
            self.touch_me(c);
            if !was_touched && self.propagation_continues(c) {
                self.touch_affected(c);
            }
        }
    }

    fn keep_me(&mut self, id: NodeId) -> Result<(), GraphError> {
        let recalc = match &mut self.node_mut(id).kind {
            NodeKind::Constant(_) => false,
            NodeKind::Deterministic(core) => {
                let dirty = core.touched && core.needs_update;
                if core.touched {
                    core.stored_value = None;
                }
                core.touched = false;
                dirty
            }
            NodeKind::Stochastic(core) => {
                let dirty = core.touched && core.needs_recalculation;
                if core.touched {
                    core.stored_value = None;
                    core.stored_probabilities.clear();
                    core.stored_likelihoods.clear();
                    core.stored_ln_prob = IMPOSSIBLE_LN_PROB;
                }
                core.touched = false;
                dirty
            }
        };
        if recalc {
            match &self.node(id).kind {
                NodeKind::Deterministic(_) => self.refresh(id)?,
                NodeKind::Stochastic(_) => {
                    self.calculate_ln_probability(id)?;
                }
                NodeKind::Constant(_) => {}
            }
        }
        Ok(())
    }

    fn keep_affected(&mut self, id: NodeId) -> Result<(), GraphError> {
        let children: Vec<NodeId> = self.node(id).children.to_vec();
        for c in children {
            if self.is_touched(c) {
                let continues = self.propagation_continues(c);
                self.keep_me(c)?;
                if continues {
                    self.keep_affected(c)?;
                }
            }
        }
        Ok(())
    }

    fn restore_me(&mut self, id: NodeId) {
        match &mut self.node_mut(id).kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(core) => {
                if core.touched {
                    if let Some(snapshot) = core.stored_value.take() {
                        core.value = snapshot;
                    }
                    core.needs_update = false;
                }
                core.touched = false;
            }
            NodeKind::Stochastic(core) => {
                if core.touched {
                    if !core.clamped {
                        if let Some(snapshot) = core.stored_value.take() {
                            core.value = snapshot;
                        }
                    }
                    core.stored_value = None;
                    core.ln_prob = core.stored_ln_prob;
                    core.stored_ln_prob = IMPOSSIBLE_LN_PROB;
                    if core.mode == EvalMode::Eliminated {
                        core.probabilities = mem::take(&mut core.stored_probabilities);
                        core.likelihoods = mem::take(&mut core.stored_likelihoods);
                    }
                    // The restored probability is known-good.
                    core.needs_recalculation = false;
                }
                core.touched = false;
            }
        }
    }

    fn restore_affected(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.node(id).children.to_vec();
        for c in children {
            if self.is_touched(c) {
                let continues = self.propagation_continues(c);
                self.restore_me(c);
                if continues {
                    self.restore_affected(c);
                }
            }
        }
    }

    // --- Proposal operations ---

    /// Replaces the node's current value, touching it (and its dependents)
    /// when instantiated. The displaced value becomes the transaction
    /// snapshot if none exists yet; otherwise it is simply discarded.
    /// Summed-out nodes may set values internally without entering the
    /// proposal protocol.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), GraphError> {
        self.check_id(id)?;
        let core = self.stochastic(id)?;
        if core.clamped {
            return Err(GraphError::ClampedNode(self.name(id).to_string()));
        }
        if core.mode == EvalMode::Instantiated {
            self.touch(id)?;
        }
        let core = self.stochastic_mut(id)?;
        if core.stored_value.is_none() {
            core.stored_value = Some(mem::replace(&mut core.value, value));
        } else {
            core.value = value;
        }
        Ok(())
    }

    /// Clamps the node to an observed value, converting it to the
    /// distribution's value type first. Must be called on a settled node;
    /// the node is left touched and the construction layer keeps the graph
    /// once assembly settles.
    pub fn clamp(&mut self, id: NodeId, observed: Value) -> Result<(), GraphError> {
        self.check_id(id)?;
        let core = self.stochastic(id)?;
        if core.touched {
            return Err(GraphError::VolatileState(self.name(id).to_string()));
        }
        let required = core.dist.value_type();

        // Touch for recalculation.
        self.touch(id)?;

        let converted = observed.convert_to(required)?;
        let core = self.stochastic_mut(id)?;
        core.value = converted;
        core.clamped = true;

        self.calculate_ln_probability(id)?;
        Ok(())
    }

    /// Releases an observation; the clamped value is retained as the
    /// starting latent value.
    pub fn unclamp(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.stochastic_mut(id)?.clamped = false;
        Ok(())
    }

    // --- Probability ---

    /// The conditional log-probability of the node. Cached when clean;
    /// delegates to the factor root's summed computation whenever one is
    /// assigned; a dirty eliminated node without a factor root is a
    /// structural defect.
    pub fn calculate_ln_probability(&mut self, id: NodeId) -> Result<f64, GraphError> {
        self.check_id(id)?;
        let core = self.stochastic(id)?;
        if let Some(root) = core.factor_root {
            return self.calculate_summed_ln_probability(root);
        }
        if core.needs_recalculation {
            match core.mode {
                EvalMode::Instantiated => {
                    let params = self.resolve_params(id)?;
                    let ln = {
                        let core = self.stochastic(id)?;
                        core.dist.ln_pdf(&params, &core.value)
                    };
                    let core = self.stochastic_mut(id)?;
                    core.ln_prob = ln;
                    core.needs_recalculation = false;
                }
                EvalMode::Eliminated => {
                    return Err(GraphError::MissingFactorRoot(self.name(id).to_string()));
                }
            }
        }
        Ok(self.stochastic(id)?.ln_prob)
    }

    /// The log-probability summed over all states of the eliminated chain
    /// below `id` — the variable elimination algorithm. Only meaningful at a
    /// factor root; it conditions on one eliminated parent at a time and
    /// does not generalize to branching elimination.
    ///
    /// The per-state log-joint is exponentiated and summed without
    /// renormalization; extreme densities or large state spaces can
    /// overflow/underflow the accumulator.
    pub fn calculate_summed_ln_probability(&mut self, id: NodeId) -> Result<f64, GraphError> {
        self.check_id(id)?;
        self.summed_contribution(id, false)
    }

    /// Likelihood contribution of `id` given the current (possibly in-flux)
    /// values of its ancestors. `force` bypasses the dirty-flag cache while
    /// an enclosing state loop re-evaluates the same node under different
    /// parent states.
    fn summed_contribution(&mut self, id: NodeId, force: bool) -> Result<f64, GraphError> {
        let core = self.stochastic(id)?;
        match core.mode {
            EvalMode::Instantiated => {
                if force || core.needs_recalculation {
                    let params = self.resolve_params(id)?;
                    let ln = {
                        let core = self.stochastic(id)?;
                        core.dist.ln_pdf(&params, &core.value)
                    };
                    let core = self.stochastic_mut(id)?;
                    core.ln_prob = ln;
                    core.needs_recalculation = false;
                }
                Ok(self.stochastic(id)?.ln_prob)
            }
            EvalMode::Eliminated => {
                // The cache is valid only if no member of the factor below is
                // mid-transaction or dirty; members do not notify the root.
                if !force && !core.needs_recalculation && !self.subtree_in_flux(id) {
                    return Ok(core.ln_prob);
                }

                let params = self.resolve_params(id)?;
                let states = {
                    let core = self.stochastic(id)?;
                    let discrete = core
                        .dist
                        .as_discrete()
                        .ok_or_else(|| GraphError::NotDiscrete(self.name(id).to_string()))?;
                    discrete.states(&params)
                };
                let children: Vec<NodeId> = self.node(id).children.to_vec();

                // A likelihood cell depends only on the child's subtree and
                // this node's state, so upstream changes leave the memo
                // valid. Re-evaluate a child's column when the child is in
                // flux or the memo has never been filled at this shape.
                let fresh = {
                    let core = self.stochastic(id)?;
                    core.likelihoods.len() != states.len()
                        || core
                            .likelihoods
                            .first()
                            .map_or(false, |row| row.len() != children.len())
                };
                let dirty: Vec<bool> = children
                    .iter()
                    .map(|&c| force || fresh || self.member_in_flux(c))
                    .collect();

                {
                    let core = self.stochastic_mut(id)?;
                    core.probabilities.resize(states.len(), 0.0);
                    core.likelihoods.resize(states.len(), Vec::new());
                    for row in core.likelihoods.iter_mut() {
                        row.resize(children.len(), 0.0);
                    }
                }

                let mut prob = 0.0;
                for (i, state) in states.iter().enumerate() {
                    // Expose this state to the children. A raw write, not
                    // `set_value`: elimination bookkeeping stays outside the
                    // proposal protocol.
                    self.stochastic_mut(id)?.value = state.clone();

                    let mut ln_likelihood = 0.0;
                    for (j, &child) in children.iter().enumerate() {
                        if dirty[j] && matches!(self.node(child).kind, NodeKind::Stochastic(_)) {
                            let contribution = self.summed_contribution(child, true)?;
                            self.stochastic_mut(id)?.likelihoods[i][j] = contribution;
                        }
                        ln_likelihood += self.stochastic(id)?.likelihoods[i][j];
                    }

                    let own = {
                        let core = self.stochastic(id)?;
                        core.dist.ln_pdf(&params, state)
                    };
                    let state_ln_joint = own + ln_likelihood;
                    self.stochastic_mut(id)?.probabilities[i] = state_ln_joint;
                    prob += state_ln_joint.exp();
                }

                let core = self.stochastic_mut(id)?;
                core.ln_prob = prob.ln();
                core.needs_recalculation = false;
                Ok(core.ln_prob)
            }
        }
    }

    /// Whether a stochastic descendant in the eliminated factor below `id`
    /// has a pending or uncommitted change invalidating the summed cache.
    fn subtree_in_flux(&self, id: NodeId) -> bool {
        self.node(id)
            .children
            .iter()
            .any(|&c| matches!(self.node(c).kind, NodeKind::Stochastic(_)) && self.member_in_flux(c))
    }

    fn member_in_flux(&self, id: NodeId) -> bool {
        self.is_touched(id)
            || self.is_dirty(id)
            || (self.is_eliminated(id) && self.subtree_in_flux(id))
    }

    /// `recomputed − stored` while a proposal is pending, `0.0` otherwise —
    /// the Metropolis-Hastings acceptance term for this node, with the
    /// snapshot plumbing hidden from the caller.
    pub fn ln_probability_ratio(&mut self, id: NodeId) -> Result<f64, GraphError> {
        self.check_id(id)?;
        let core = self.stochastic(id)?;
        if !core.touched {
            return Ok(0.0);
        }
        let stored = core.stored_ln_prob;
        let current = self.calculate_ln_probability(id)?;
        Ok(current - stored)
    }

    // --- Elimination mode ---

    /// Toggles between holding a concrete value (`Instantiated`) and being
    /// summed out analytically (`Eliminated`). Switching to eliminated
    /// allocates the per-state caches and adopts the factor root of an
    /// eliminated parent if one exists, else the node heads a new chain.
    /// Switching back clears the caches and a self-assigned factor root;
    /// a root inherited from eliminated parents that remain is kept.
    pub fn set_instantiated(&mut self, id: NodeId, instantiated: bool) -> Result<(), GraphError> {
        self.check_id(id)?;
        let mode = self.stochastic(id)?.mode;

        if mode == EvalMode::Eliminated && instantiated {
            let core = self.stochastic_mut(id)?;
            core.probabilities.clear();
            core.likelihoods.clear();
            core.stored_probabilities.clear();
            core.stored_likelihoods.clear();
            core.mode = EvalMode::Instantiated;
            if core.factor_root == Some(id) {
                core.factor_root = None;
            }
            core.needs_recalculation = true;
        } else if mode == EvalMode::Instantiated && !instantiated {
            let params = self.resolve_params(id)?;
            let n_states = {
                let core = self.stochastic(id)?;
                let discrete = core
                    .dist
                    .as_discrete()
                    .ok_or_else(|| GraphError::NotDiscrete(self.name(id).to_string()))?;
                discrete.state_count(&params)
            };

            // Walk the parents for an eliminated ancestor whose chain this
            // node joins.
            let mut root = id;
            let parents: Vec<NodeId> = self.node(id).parents.to_vec();
            for p in parents {
                if let NodeKind::Stochastic(pc) = &self.node(p).kind {
                    if pc.mode == EvalMode::Eliminated {
                        if let Some(r) = pc.factor_root {
                            root = r;
                        }
                    }
                }
            }

            let n_children = self.node(id).children.len();
            let core = self.stochastic_mut(id)?;
            core.probabilities = vec![0.0; n_states];
            core.likelihoods = vec![vec![0.0; n_children]; n_states];
            core.factor_root = Some(root);
            core.mode = EvalMode::Eliminated;
            core.needs_recalculation = true;
        }
        Ok(())
    }

    // --- Structure changes ---

    /// Atomically replaces the edge from `old` with one from `new`, in both
    /// directions, rewriting the named parameter mapping to match. Rejected
    /// on a clamped node. Acts as a value-preserving touch: the current value
    /// is cloned into the snapshot so recomputation is triggered without
    /// losing the latent value.
    pub fn swap_parent(
        &mut self,
        id: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.check_id(old)?;
        self.check_id(new)?;
        if self.stochastic(id)?.clamped {
            return Err(GraphError::ClampedNode(self.name(id).to_string()));
        }

        if !self.node(id).parents.contains(&old) {
            return Err(GraphError::NotAParent(self.name(old).to_string()));
        }
        // Check before mutating, so a rejected swap leaves the graph intact.
        if id == new || self.is_ancestor_of(id, new) {
            return Err(GraphError::CycleDetected {
                parent: self.name(new).to_string(),
                child: self.name(id).to_string(),
            });
        }

        self.remove_parent(id, old);
        self.link_edge(id, new);

        let core = self.stochastic_mut(id)?;
        for (_, pid) in core.params.iter_mut() {
            if *pid == old {
                *pid = new;
            }
        }

        // Value-preserving touch: snapshot without discarding the current
        // value, so a delegating move may still alter it afterwards.
        self.touch_me(id);
        let core = self.stochastic_mut(id)?;
        if core.stored_value.is_none() {
            core.stored_value = Some(core.value.clone());
        }
        Ok(())
    }

    // --- Affected set ---

    /// Collects every node whose probability delta the caller must consult
    /// for a change at `id`: the node itself (if stochastic) plus its
    /// downstream stochastic dependents. An instantiated stochastic
    /// descendant reports itself and stops the traversal; eliminated and
    /// derived nodes pass it on to their children.
    pub fn get_affected(&self, id: NodeId, affected: &mut BTreeSet<NodeId>) {
        if matches!(self.node(id).kind, NodeKind::Stochastic(_)) {
            affected.insert(id);
        }
        for &c in &self.node(id).children {
            self.affected_descendants(c, affected);
        }
    }

    fn affected_descendants(&self, id: NodeId, affected: &mut BTreeSet<NodeId>) {
        match &self.node(id).kind {
            NodeKind::Stochastic(core) => {
                affected.insert(id);
                if core.mode == EvalMode::Eliminated {
                    for &c in &self.node(id).children {
                        self.affected_descendants(c, affected);
                    }
                }
            }
            NodeKind::Deterministic(_) | NodeKind::Constant(_) => {
                for &c in &self.node(id).children {
                    self.affected_descendants(c, affected);
                }
            }
        }
    }
}
