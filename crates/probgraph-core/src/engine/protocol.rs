//! # Consistency Protocol
//!
//! Touch / keep / restore propagation and lazy re-evaluation for [`ModelGraph`].
//!
//! A change to a node is announced with `touch`, which marks the node and every
//! dependent whose result may change. Deterministic nodes are recomputed on the
//! next read, stochastic nodes recompute their log-probability on the next
//! query. The change is then either committed with `keep` or rolled back with
//! `restore`.
//!
//! Propagation uses explicit worklists. A node that is already touched and
//! still stale is not visited again, so in diamond-shaped graphs every node is
//! marked and recomputed once per change.

use rustc_hash::FxHashSet;

use crate::engine::collaborators::Params;
use crate::engine::errors::ModelError;
use crate::engine::graph::{ModelGraph, NodeBody, NodeKind, ParentList};
use crate::engine::value::NodeId;

impl ModelGraph {
    /// Marks `id` and its dependents as potentially stale.
    ///
    /// Deterministic children forward the touch to their own children. A
    /// stochastic child is touched (its log-probability is stale) but does
    /// not forward, since its value is unchanged. The root always forwards.
    /// Children whose collaborator is insensitive to the changed parent are
    /// skipped, as are children already pending from an earlier touch.
    pub fn touch(&mut self, id: NodeId) -> Result<(), ModelError> {
        if !self.entry(id)?.touched {
            self.snapshot_committed(id)?;
        }

        self.touch_me(id)?;
        let mut stack: Vec<(NodeId, NodeId)> = self
            .entry(id)?
            .children
            .iter()
            .map(|&child| (id, child))
            .collect();

        while let Some((parent, child)) = stack.pop() {
            let entry = self.entry(child)?;
            if entry.is_pending() || !entry.body.sensitive_to(parent) {
                continue;
            }
            self.touch_me(child)?;
            let entry = self.entry(child)?;
            if entry.body.kind() == NodeKind::Deterministic {
                stack.extend(entry.children.iter().map(|&grandchild| (child, grandchild)));
            }
        }
        Ok(())
    }

    fn touch_me(&mut self, id: NodeId) -> Result<(), ModelError> {
        let entry = self.entry_mut(id)?;
        let first = !entry.touched;
        entry.touched = true;
        match &mut entry.body {
            NodeBody::Constant(_) => {}
            NodeBody::Stochastic(state) => {
                if first {
                    state.stored_ln_prob = state.ln_prob;
                }
                state.needs_ln_prob = true;
            }
            NodeBody::Deterministic(state) => state.needs_update = true,
        }
        Ok(())
    }

    /// Brings the committed log-probabilities of `id` and of every untouched
    /// affected node up to date, so the first touch of a change can store them.
    pub(crate) fn snapshot_committed(&mut self, id: NodeId) -> Result<(), ModelError> {
        let entry = self.entry(id)?;
        if entry.body.kind() == NodeKind::Stochastic && !entry.touched {
            self.ln_probability(id)?;
        }
        for affected in self.affected_nodes(id)? {
            if !self.entry(affected)?.touched {
                self.ln_probability(affected)?;
            }
        }
        Ok(())
    }

    /// Commits the outstanding change at `id` and every touched descendant.
    ///
    /// Keeping a node that is not touched is a no-op.
    pub fn keep(&mut self, id: NodeId) -> Result<(), ModelError> {
        if !self.entry(id)?.touched {
            #[cfg(feature = "tracing")]
            tracing::debug!("keep on untouched node {} ignored", id);
            return Ok(());
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let entry = self.entry_mut(next)?;
            if !entry.touched {
                continue;
            }
            entry.touched = false;
            entry.changed = false;
            match &mut entry.body {
                NodeBody::Constant(state) => state.stored_value = None,
                NodeBody::Stochastic(state) => state.stored_value = None,
                NodeBody::Deterministic(_) => {}
            }
            stack.extend(entry.children.iter().copied());
        }
        Ok(())
    }

    /// Rolls back the outstanding change at `id` and every touched descendant.
    ///
    /// Stochastic and constant nodes get their committed value back, stochastic
    /// nodes their committed log-probability, deterministic nodes are marked
    /// for recomputation from the restored parents. Restoring a node that is
    /// not touched is a no-op.
    pub fn restore(&mut self, id: NodeId) -> Result<(), ModelError> {
        if !self.entry(id)?.touched {
            #[cfg(feature = "tracing")]
            tracing::debug!("restore on untouched node {} ignored", id);
            return Ok(());
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let entry = self.entry_mut(next)?;
            if !entry.touched {
                continue;
            }
            entry.touched = false;
            entry.changed = false;
            match &mut entry.body {
                NodeBody::Constant(state) => {
                    if let Some(stored) = state.stored_value.take() {
                        state.value = stored;
                    }
                }
                NodeBody::Stochastic(state) => {
                    if let Some(stored) = state.stored_value.take() {
                        state.value = stored;
                    }
                    state.ln_prob = state.stored_ln_prob;
                    state.needs_ln_prob = false;
                }
                NodeBody::Deterministic(state) => state.needs_update = true,
            }
            stack.extend(entry.children.iter().copied());
        }
        Ok(())
    }

    /// Stochastic nodes whose log-probability depends on the value of `id`,
    /// reached through chains of deterministic nodes. `id` itself is excluded.
    pub fn affected_nodes(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let mut affected = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack: Vec<(NodeId, NodeId)> = self
            .entry(id)?
            .children
            .iter()
            .rev()
            .map(|&child| (id, child))
            .collect();

        while let Some((parent, child)) = stack.pop() {
            let entry = self.entry(child)?;
            if !entry.body.sensitive_to(parent) || !seen.insert(child) {
                continue;
            }
            match entry.body.kind() {
                NodeKind::Stochastic => affected.push(child),
                NodeKind::Deterministic => stack.extend(
                    entry
                        .children
                        .iter()
                        .rev()
                        .map(|&grandchild| (child, grandchild)),
                ),
                NodeKind::Constant => {}
            }
        }
        Ok(affected)
    }

    /// Ids of every node with an outstanding change, ascending.
    pub fn touched_nodes(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| self.entry(id).map(|entry| entry.touched).unwrap_or(false))
            .collect()
    }

    /// Log-probability of a stochastic node's current value; `0.0` for other kinds.
    ///
    /// In prior-only mode clamped nodes report `0.0`.
    pub fn ln_probability(&mut self, id: NodeId) -> Result<f64, ModelError> {
        match &self.entry(id)?.body {
            NodeBody::Stochastic(state) if !state.needs_ln_prob => return Ok(state.ln_prob),
            NodeBody::Stochastic(_) => {}
            _ => return Ok(0.0),
        }

        self.refresh_parents(id)?;
        let ln_prob = match &self.entry(id)?.body {
            NodeBody::Stochastic(state) if self.prior_only && state.clamped => 0.0,
            NodeBody::Stochastic(state) => {
                state
                    .distribution
                    .ln_probability_of(state.value.as_ref(), id, &Params::new(self))?
            }
            _ => return Err(ModelError::Internal(format!("node {} changed kind", id))),
        };

        if ln_prob.is_nan() {
            #[cfg(feature = "tracing")]
            tracing::warn!("log-probability of node {} is NaN", id);
        }

        if let NodeBody::Stochastic(state) = &mut self.entry_mut(id)?.body {
            state.ln_prob = ln_prob;
            state.needs_ln_prob = false;
        }
        Ok(ln_prob)
    }

    /// Current minus committed log-probability; `0.0` when nothing is outstanding
    /// or the node is not stochastic.
    pub fn ln_probability_ratio(&mut self, id: NodeId) -> Result<f64, ModelError> {
        let entry = self.entry(id)?;
        if !entry.touched || entry.body.kind() != NodeKind::Stochastic {
            return Ok(0.0);
        }
        let current = self.ln_probability(id)?;
        match &self.entry(id)?.body {
            NodeBody::Stochastic(state) => Ok(current - state.stored_ln_prob),
            _ => Ok(0.0),
        }
    }

    /// Recomputes `id` and its stale deterministic ancestors, parents first.
    pub(crate) fn refresh(&mut self, id: NodeId) -> Result<(), ModelError> {
        if !self.is_stale_deterministic(id)? {
            return Ok(());
        }

        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![(id, false)];
        while let Some((next, expanded)) = stack.pop() {
            if expanded {
                order.push(next);
                continue;
            }
            if !visited.insert(next) || !self.is_stale_deterministic(next)? {
                continue;
            }
            stack.push((next, true));
            for &parent in self.entry(next)?.parents.iter() {
                if !visited.contains(&parent) {
                    stack.push((parent, false));
                }
            }
        }

        for next in order {
            self.update_deterministic(next)?;
        }
        Ok(())
    }

    pub(crate) fn refresh_parents(&mut self, id: NodeId) -> Result<(), ModelError> {
        let parents: ParentList = self.entry(id)?.parents.clone();
        for parent in parents {
            self.refresh(parent)?;
        }
        Ok(())
    }

    fn is_stale_deterministic(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(matches!(
            &self.entry(id)?.body,
            NodeBody::Deterministic(state) if state.needs_update
        ))
    }

    fn update_deterministic(&mut self, id: NodeId) -> Result<(), ModelError> {
        let computed = match &self.entry(id)?.body {
            NodeBody::Deterministic(state) => state.function.compute(&Params::new(self))?,
            _ => return Ok(()),
        };

        let entry = self.entry_mut(id)?;
        if let NodeBody::Deterministic(state) = &mut entry.body {
            let differs = state
                .value
                .as_ref()
                .map_or(true, |previous| !previous.eq_dyn(computed.as_ref()));
            if entry.touched && differs {
                entry.changed = true;
            }
            state.value = Some(computed);
            state.needs_update = false;
        }
        Ok(())
    }
}
