//! # Model Graph
//!
//! Arena of constant, stochastic and deterministic nodes connected by
//! parent/child edges.
//!
//! Nodes are addressed by [`NodeId`] and hold one cached, type-erased value.
//! Parent edges mirror the parameters of the node's collaborator (its
//! distribution or function); child edges are plain ids and never keep a node
//! alive. A node is freed once it has no external holds and no children.
//!
//! ## Key Components
//!
//! - **ModelGraph**: owns every node; construction, typed access, mutation
//! - **NodeKind**: constant, stochastic or deterministic
//! - **NodeEntry**: per-node topology, flags and body
//!
//! The touch/keep/restore protocol and lazy evaluation live in
//! [`crate::engine::protocol`].

use std::any::TypeId;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::engine::collaborators::{
    Distribution, DynDistribution, DynFunction, Function, Params,
};
use crate::engine::errors::ModelError;
use crate::engine::value::{downcast, DynValue, Handle, NodeId, Value};

pub(crate) type ParentList = SmallVec<[NodeId; 4]>;

/// Role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    Constant,
    Stochastic,
    Deterministic,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Constant => "constant",
            NodeKind::Stochastic => "stochastic",
            NodeKind::Deterministic => "deterministic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConstantState {
    pub(crate) value: Box<dyn DynValue>,
    /// Committed value while a rebinding is outstanding.
    pub(crate) stored_value: Option<Box<dyn DynValue>>,
}

#[derive(Debug, Clone)]
pub(crate) struct StochasticState {
    pub(crate) value: Box<dyn DynValue>,
    pub(crate) stored_value: Option<Box<dyn DynValue>>,
    pub(crate) distribution: Box<dyn DynDistribution>,
    pub(crate) clamped: bool,
    pub(crate) ln_prob: f64,
    /// Committed log-probability, captured on the first touch of a change.
    pub(crate) stored_ln_prob: f64,
    pub(crate) needs_ln_prob: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct DeterministicState {
    /// `None` until the first evaluation.
    pub(crate) value: Option<Box<dyn DynValue>>,
    pub(crate) function: Box<dyn DynFunction>,
    pub(crate) needs_update: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeBody {
    Constant(ConstantState),
    Stochastic(StochasticState),
    Deterministic(DeterministicState),
}

impl NodeBody {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Constant(_) => NodeKind::Constant,
            NodeBody::Stochastic(_) => NodeKind::Stochastic,
            NodeBody::Deterministic(_) => NodeKind::Deterministic,
        }
    }

    pub(crate) fn value_type(&self) -> TypeId {
        match self {
            NodeBody::Constant(state) => state.value.value_type(),
            NodeBody::Stochastic(state) => state.distribution.value_type(),
            NodeBody::Deterministic(state) => state.function.value_type(),
        }
    }

    /// Whether a change of `parent` reaches this node.
    pub(crate) fn sensitive_to(&self, parent: NodeId) -> bool {
        match self {
            NodeBody::Constant(_) => false,
            NodeBody::Stochastic(state) => state.distribution.sensitive_to(parent),
            NodeBody::Deterministic(state) => state.function.sensitive_to(parent),
        }
    }

    /// Whether the cached result (value or log-probability) must be recomputed.
    pub(crate) fn is_stale(&self) -> bool {
        match self {
            NodeBody::Constant(_) => false,
            NodeBody::Stochastic(state) => state.needs_ln_prob,
            NodeBody::Deterministic(state) => state.needs_update,
        }
    }

    pub(crate) fn remap_parameters(&mut self, remap: &mut dyn FnMut(NodeId) -> NodeId) {
        match self {
            NodeBody::Constant(_) => {}
            NodeBody::Stochastic(state) => state.distribution.remap(remap),
            NodeBody::Deterministic(state) => state.function.remap(remap),
        }
    }

    fn collaborator(&self) -> Option<&'static str> {
        match self {
            NodeBody::Constant(_) => None,
            NodeBody::Stochastic(state) => Some(state.distribution.label()),
            NodeBody::Deterministic(state) => Some(state.function.label()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeEntry {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) parents: ParentList,
    pub(crate) children: BTreeSet<NodeId>,
    pub(crate) holds: u32,
    /// A change reaching this node awaits keep or restore.
    pub(crate) touched: bool,
    /// The value differs from the last kept value since the last touch.
    pub(crate) changed: bool,
    pub(crate) body: NodeBody,
}

impl NodeEntry {
    /// Touched and not yet re-evaluated; descendants are pending as well.
    pub(crate) fn is_pending(&self) -> bool {
        self.touched && self.body.is_stale()
    }
}

/// Arena of model nodes.
///
/// Ids are never reused: freed nodes leave an empty slot behind.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    pub(crate) nodes: Vec<Option<NodeEntry>>,
    pub(crate) names: FxHashMap<Arc<str>, NodeId>,
    pub(crate) live: usize,
    pub(crate) prior_only: bool,
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- construction -----

    /// Adds a constant node. An empty `name` leaves the node anonymous.
    pub fn add_constant<T: Value>(&mut self, name: &str, value: T) -> Result<Handle<T>, ModelError> {
        let body = NodeBody::Constant(ConstantState {
            value: Box::new(value),
            stored_value: None,
        });
        self.insert(name, ParentList::new(), body).map(Handle::from_id)
    }

    /// Adds a stochastic node with an explicit initial value.
    pub fn add_stochastic<D: Distribution>(
        &mut self,
        name: &str,
        distribution: D,
        initial: D::Value,
    ) -> Result<Handle<D::Value>, ModelError> {
        let parents = ParentList::from_vec(Distribution::parameters(&distribution));
        let body = NodeBody::Stochastic(StochasticState {
            value: Box::new(initial),
            stored_value: None,
            distribution: Box::new(distribution),
            clamped: false,
            ln_prob: f64::NAN,
            stored_ln_prob: f64::NAN,
            needs_ln_prob: true,
        });
        self.insert(name, parents, body).map(Handle::from_id)
    }

    /// Adds a stochastic node whose initial value is drawn from `distribution`.
    pub fn add_stochastic_drawn<D: Distribution>(
        &mut self,
        name: &str,
        distribution: D,
        rng: &mut dyn RngCore,
    ) -> Result<Handle<D::Value>, ModelError> {
        for parent in Distribution::parameters(&distribution) {
            self.entry(parent)?;
            self.refresh(parent)?;
        }
        let initial = Distribution::draw(&distribution, &Params::new(self), rng)?;
        self.add_stochastic(name, distribution, initial)
    }

    /// Adds a deterministic node. Its value is computed on first read.
    pub fn add_deterministic<F: Function>(
        &mut self,
        name: &str,
        function: F,
    ) -> Result<Handle<F::Value>, ModelError> {
        let parents = ParentList::from_vec(Function::parameters(&function));
        let body = NodeBody::Deterministic(DeterministicState {
            value: None,
            function: Box::new(function),
            needs_update: true,
        });
        self.insert(name, parents, body).map(Handle::from_id)
    }

    fn insert(
        &mut self,
        name: &str,
        mut parents: ParentList,
        body: NodeBody,
    ) -> Result<NodeId, ModelError> {
        dedup_in_order(&mut parents);
        for &parent in &parents {
            self.entry(parent)?;
        }
        let name = self.claim_name(name)?;
        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| {
            ModelError::Construction("node id space exhausted".into())
        })?);

        for &parent in &parents {
            self.entry_mut(parent)?.children.insert(id);
        }
        if let Some(name) = &name {
            self.names.insert(name.clone(), id);
        }
        self.nodes.push(Some(NodeEntry {
            name,
            parents,
            children: BTreeSet::new(),
            holds: 1,
            touched: false,
            changed: false,
            body,
        }));
        self.live += 1;
        Ok(id)
    }

    fn claim_name(&self, name: &str) -> Result<Option<Arc<str>>, ModelError> {
        if name.is_empty() {
            return Ok(None);
        }
        if self.names.contains_key(name) {
            return Err(ModelError::Construction(format!(
                "a node named '{}' already exists",
                name
            )));
        }
        Ok(Some(Arc::from(name)))
    }

    /// Registers `parent` as an additional dependency of `child` and touches `child`.
    ///
    /// Edges normally come from collaborator parameters at construction; this
    /// adds one the collaborator reads through other means.
    pub fn add_parameter(&mut self, child: NodeId, parent: NodeId) -> Result<(), ModelError> {
        let entry = self.entry(child)?;
        if entry.body.kind() == NodeKind::Constant {
            return Err(ModelError::Construction(format!(
                "constant node {} cannot take parameters",
                child
            )));
        }
        if entry.parents.contains(&parent) {
            return Err(ModelError::Construction(format!(
                "{} is already a parameter of {}",
                parent, child
            )));
        }
        self.entry(parent)?;
        if parent == child || self.is_descendant(child, parent)? {
            return Err(ModelError::Construction(format!(
                "adding {} as a parameter of {} would create a cycle",
                parent, child
            )));
        }

        self.snapshot_committed(child)?;
        self.entry_mut(child)?.parents.push(parent);
        self.entry_mut(parent)?.children.insert(child);
        self.touch(child)
    }

    /// Replaces the parent edge `old → child` with `new → child`.
    ///
    /// The collaborator, both edge sets and the hold graph are updated in one
    /// step, `old` is freed if nothing references it any more, then `child`
    /// is touched.
    pub fn swap_parameter(
        &mut self,
        child: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), ModelError> {
        if !self.entry(child)?.parents.contains(&old) {
            return Err(ModelError::Construction(format!(
                "{} is not a parameter of {}",
                old, child
            )));
        }
        let old_type = self.entry(old)?.body.value_type();
        let new_entry = self.entry(new)?;
        if new_entry.body.value_type() != old_type {
            return Err(ModelError::TypeMismatch(format!(
                "cannot swap parameter {} of {} for {}: value types differ",
                old, child, new
            )));
        }
        if old == new {
            return Ok(());
        }
        if new == child || self.is_descendant(child, new)? {
            return Err(ModelError::Construction(format!(
                "swapping {} into {} would create a cycle",
                new, child
            )));
        }

        self.snapshot_committed(child)?;

        let entry = self.entry_mut(child)?;
        entry
            .body
            .remap_parameters(&mut |id| if id == old { new } else { id });
        for parent in entry.parents.iter_mut() {
            if *parent == old {
                *parent = new;
            }
        }
        dedup_in_order(&mut entry.parents);
        self.entry_mut(old)?.children.remove(&child);
        self.entry_mut(new)?.children.insert(child);

        self.touch(child)?;
        self.collect_unreferenced(old);
        Ok(())
    }

    // ----- ownership -----

    /// Adds an external hold on `id`; returns the new hold count.
    pub fn retain(&mut self, id: NodeId) -> Result<u32, ModelError> {
        let entry = self.entry_mut(id)?;
        entry.holds += 1;
        Ok(entry.holds)
    }

    /// Drops an external hold on `id` and frees every node left without
    /// holds and children. Returns the freed ids.
    pub fn release(&mut self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let entry = self.entry_mut(id)?;
        if entry.holds == 0 {
            return Err(ModelError::Misuse(format!("node {} has no holds to release", id)));
        }
        entry.holds -= 1;
        Ok(self.collect_unreferenced(id))
    }

    pub fn holds(&self, id: NodeId) -> Result<u32, ModelError> {
        Ok(self.entry(id)?.holds)
    }

    fn collect_unreferenced(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut freed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let unreferenced = matches!(
                self.nodes.get(next.index()),
                Some(Some(entry)) if entry.holds == 0 && entry.children.is_empty()
            );
            if !unreferenced {
                continue;
            }
            let Some(entry) = self.nodes.get_mut(next.index()).and_then(Option::take) else {
                continue;
            };
            self.live -= 1;
            if let Some(name) = &entry.name {
                self.names.remove(name);
            }
            for &parent in &entry.parents {
                if let Some(Some(parent_entry)) = self.nodes.get_mut(parent.index()) {
                    parent_entry.children.remove(&next);
                }
                stack.push(parent);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("freed node {} ({})", next, entry.body.kind());
            freed.push(next);
        }
        freed
    }

    // ----- structure queries -----

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    /// Live node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: NodeId) -> Result<Option<&str>, ModelError> {
        Ok(self.entry(id)?.name.as_deref())
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind, ModelError> {
        Ok(self.entry(id)?.body.kind())
    }

    /// Name of the attached distribution or function.
    pub fn collaborator_name(&self, id: NodeId) -> Result<Option<&'static str>, ModelError> {
        Ok(self.entry(id)?.body.collaborator())
    }

    pub fn parents(&self, id: NodeId) -> Result<&[NodeId], ModelError> {
        Ok(&self.entry(id)?.parents)
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        Ok(self.entry(id)?.children.iter().copied().collect())
    }

    pub fn is_touched(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(self.entry(id)?.touched)
    }

    pub fn is_changed(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(self.entry(id)?.changed)
    }

    /// `false` for nodes that are not stochastic.
    pub fn is_clamped(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(matches!(
            &self.entry(id)?.body,
            NodeBody::Stochastic(state) if state.clamped
        ))
    }

    /// Whether the node's value can never change: constants, and deterministic
    /// nodes whose ancestors are all constants or deterministic.
    pub fn is_constant(&self, id: NodeId) -> Result<bool, ModelError> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let entry = self.entry(next)?;
            match entry.body {
                NodeBody::Stochastic(_) => return Ok(false),
                NodeBody::Constant(_) => {}
                NodeBody::Deterministic(_) => stack.extend(entry.parents.iter().copied()),
            }
        }
        Ok(true)
    }

    /// Whether `candidate` is reachable from `ancestor` through child edges.
    pub fn is_descendant(&self, ancestor: NodeId, candidate: NodeId) -> Result<bool, ModelError> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<NodeId> = self.entry(ancestor)?.children.iter().copied().collect();
        while let Some(next) = stack.pop() {
            if next == candidate {
                return Ok(true);
            }
            if seen.insert(next) {
                stack.extend(self.entry(next)?.children.iter().copied());
            }
        }
        Ok(false)
    }

    // ----- values -----

    /// Current value of a node, recomputing stale deterministic ancestors first.
    pub fn value<T: Value>(&mut self, handle: Handle<T>) -> Result<&T, ModelError> {
        let id = handle.id();
        self.refresh(id)?;
        downcast::<T>(self.cached_value(id)?, id)
    }

    /// Current value formatted for diagnostics.
    pub fn value_debug(&mut self, id: NodeId) -> Result<String, ModelError> {
        self.refresh(id)?;
        Ok(format!("{:?}", self.cached_value(id)?))
    }

    /// Cached value slot without refreshing.
    pub(crate) fn cached_value(&self, id: NodeId) -> Result<&dyn DynValue, ModelError> {
        match &self.entry(id)?.body {
            NodeBody::Constant(state) => Ok(state.value.as_ref()),
            NodeBody::Stochastic(state) => Ok(state.value.as_ref()),
            NodeBody::Deterministic(state) => state.value.as_deref().ok_or_else(|| {
                ModelError::Internal(format!("deterministic node {} was never evaluated", id))
            }),
        }
    }

    /// Forcibly sets the value of an unclamped stochastic node and touches it.
    pub fn set_value<T: Value>(&mut self, handle: Handle<T>, value: T) -> Result<(), ModelError> {
        let id = handle.id();
        match &self.entry(id)?.body {
            NodeBody::Stochastic(state) if state.clamped => {
                return Err(ModelError::Misuse(format!(
                    "node {} is clamped; use clamp to change observed data",
                    id
                )));
            }
            NodeBody::Stochastic(_) => {}
            NodeBody::Constant(_) => {
                return Err(ModelError::Misuse(format!(
                    "node {} is constant; use set_constant to rebind it",
                    id
                )));
            }
            NodeBody::Deterministic(_) => {
                return Err(ModelError::Misuse(format!(
                    "deterministic node {} is computed from its parents",
                    id
                )));
            }
        }
        self.write_value(id, Box::new(value))
    }

    /// Rebinds a constant node and touches it.
    pub fn set_constant<T: Value>(&mut self, handle: Handle<T>, value: T) -> Result<(), ModelError> {
        let id = handle.id();
        if self.entry(id)?.body.kind() != NodeKind::Constant {
            return Err(ModelError::Misuse(format!("node {} is not a constant", id)));
        }
        self.write_value(id, Box::new(value))
    }

    /// Binds a stochastic node to observed data and touches it.
    pub fn clamp<T: Value>(&mut self, handle: Handle<T>, observed: &T) -> Result<(), ModelError> {
        let id = handle.id();
        if self.entry(id)?.body.kind() != NodeKind::Stochastic {
            return Err(ModelError::Misuse(format!(
                "only stochastic nodes can be clamped, {} is not",
                id
            )));
        }
        self.write_value(id, Box::new(observed.clone()))?;
        if let NodeBody::Stochastic(state) = &mut self.entry_mut(id)?.body {
            state.clamped = true;
        }
        Ok(())
    }

    /// Releases a clamp; the node keeps its observed value until the next proposal.
    pub fn unclamp(&mut self, id: NodeId) -> Result<(), ModelError> {
        let prior_only = self.prior_only;
        match &mut self.entry_mut(id)?.body {
            NodeBody::Stochastic(state) => {
                if state.clamped && prior_only {
                    state.needs_ln_prob = true;
                }
                state.clamped = false;
                Ok(())
            }
            _ => Err(ModelError::Misuse(format!("node {} is not stochastic", id))),
        }
    }

    /// Replaces the value of an unclamped stochastic node with a fresh draw.
    pub fn redraw(&mut self, id: NodeId, rng: &mut dyn RngCore) -> Result<(), ModelError> {
        match &self.entry(id)?.body {
            NodeBody::Stochastic(state) if state.clamped => {
                return Err(ModelError::Misuse(format!(
                    "cannot redraw clamped node {}",
                    id
                )));
            }
            NodeBody::Stochastic(_) => {}
            _ => return Err(ModelError::Misuse(format!("node {} is not stochastic", id))),
        }
        self.refresh_parents(id)?;
        let drawn = match &self.entry(id)?.body {
            NodeBody::Stochastic(state) => state.distribution.draw_value(&Params::new(self), rng)?,
            _ => return Err(ModelError::Internal(format!("node {} changed kind", id))),
        };
        self.write_value(id, drawn)
    }

    fn write_value(&mut self, id: NodeId, value: Box<dyn DynValue>) -> Result<(), ModelError> {
        let expected = self.entry(id)?.body.value_type();
        if value.value_type() != expected {
            return Err(ModelError::TypeMismatch(format!(
                "node {} cannot hold a value of type {}",
                id,
                value.type_name()
            )));
        }
        self.snapshot_committed(id)?;

        let entry = self.entry_mut(id)?;
        match &mut entry.body {
            NodeBody::Constant(state) => {
                if state.stored_value.is_none() {
                    state.stored_value = Some(std::mem::replace(&mut state.value, value));
                } else {
                    state.value = value;
                }
            }
            NodeBody::Stochastic(state) => {
                if state.stored_value.is_none() {
                    state.stored_value = Some(std::mem::replace(&mut state.value, value));
                } else {
                    state.value = value;
                }
            }
            NodeBody::Deterministic(_) => {
                return Err(ModelError::Internal(format!(
                    "attempted to write deterministic node {}",
                    id
                )));
            }
        }
        entry.changed = true;
        self.touch(id)
    }

    /// Whether clamped nodes are ignored when computing log-probabilities.
    pub fn prior_only(&self) -> bool {
        self.prior_only
    }

    /// Switches prior-only mode; clamped nodes then report a log-probability of 0.
    pub fn set_prior_only(&mut self, prior_only: bool) {
        if self.prior_only == prior_only {
            return;
        }
        self.prior_only = prior_only;
        for entry in self.nodes.iter_mut().flatten() {
            if let NodeBody::Stochastic(state) = &mut entry.body {
                if state.clamped {
                    state.needs_ln_prob = true;
                }
            }
        }
    }

    // ----- arena access -----

    pub(crate) fn entry(&self, id: NodeId) -> Result<&NodeEntry, ModelError> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(ModelError::UnknownNode(id))
    }

    pub(crate) fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry, ModelError> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(ModelError::UnknownNode(id))
    }
}

fn dedup_in_order(ids: &mut ParentList) {
    let mut seen = FxHashSet::default();
    ids.retain(|id| seen.insert(*id));
}
