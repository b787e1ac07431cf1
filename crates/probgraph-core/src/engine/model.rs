//! # Model Assembly
//!
//! A [`Model`] is the closure of nodes reachable through parent edges from one
//! or more sink nodes. Assembly verifies the closure is acyclic, orders it
//! topologically and copies it into a graph the model owns, so independent
//! chains can run on separate models built from the same source graph.

use std::collections::BTreeSet;

use rand::RngCore;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::errors::ModelError;
use crate::engine::graph::{ModelGraph, NodeKind};
use crate::engine::value::{Handle, NodeId};

/// Independent, validated copy of the nodes a set of sinks depends on.
#[derive(Debug, Clone)]
pub struct Model {
    graph: ModelGraph,
    sinks: Vec<NodeId>,
    /// Topological order, parents before children.
    order: Vec<NodeId>,
    /// Source graph id → model graph id.
    source_ids: FxHashMap<NodeId, NodeId>,
}

impl Model {
    /// Assembles a model from the closure of `sinks` in `source`.
    ///
    /// Fails if `sinks` is empty, names an unknown node, the closure contains a
    /// cycle, or any node of the closure has an outstanding change.
    pub fn from_sinks(source: &ModelGraph, sinks: &[NodeId]) -> Result<Self, ModelError> {
        if sinks.is_empty() {
            return Err(ModelError::Construction(
                "a model needs at least one sink node".into(),
            ));
        }

        let mut closure = FxHashSet::default();
        let mut stack = sinks.to_vec();
        while let Some(next) = stack.pop() {
            if !closure.insert(next) {
                continue;
            }
            let entry = source.entry(next)?;
            if entry.touched {
                return Err(ModelError::Misuse(format!(
                    "cannot assemble a model while node {} has an outstanding change",
                    next
                )));
            }
            stack.extend(entry.parents.iter().copied());
        }

        let order = topological_order(source, &closure)?;
        let source_ids: FxHashMap<NodeId, NodeId> = order
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, NodeId(idx as u32)))
            .collect();

        let mut graph = ModelGraph {
            prior_only: source.prior_only,
            ..ModelGraph::default()
        };
        for (idx, &id) in order.iter().enumerate() {
            let mut entry = source.entry(id)?.clone();
            let mut remap = |node: NodeId| source_ids.get(&node).copied().unwrap_or(node);
            entry.body.remap_parameters(&mut remap);
            entry.parents = entry.parents.iter().map(|&parent| remap(parent)).collect();
            entry.children = entry
                .children
                .iter()
                .filter_map(|child| source_ids.get(child).copied())
                .collect();
            entry.holds = 1;
            if let Some(name) = &entry.name {
                graph.names.insert(name.clone(), NodeId(idx as u32));
            }
            graph.nodes.push(Some(entry));
            graph.live += 1;
        }

        let mut sink_ids = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let id = source_ids.get(sink).copied().ok_or_else(|| {
                ModelError::Internal(format!("sink {} missing from closure", sink))
            })?;
            if !sink_ids.contains(&id) {
                sink_ids.push(id);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "assembled model with {} nodes from {} sinks",
            order.len(),
            sink_ids.len()
        );

        Ok(Self {
            order: (0..order.len()).map(|idx| NodeId(idx as u32)).collect(),
            graph,
            sinks: sink_ids,
            source_ids,
        })
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    /// Mutable access for proposals and moves. Call [`Model::reorder`] after
    /// rewiring parameters.
    pub fn graph_mut(&mut self) -> &mut ModelGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> ModelGraph {
        self.graph
    }

    pub fn sinks(&self) -> &[NodeId] {
        &self.sinks
    }

    /// Node ids in topological order, parents first.
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Model id of a node of the source graph, if it belongs to the closure.
    pub fn translate(&self, source: NodeId) -> Option<NodeId> {
        self.source_ids.get(&source).copied()
    }

    pub fn translate_handle<T>(&self, source: Handle<T>) -> Option<Handle<T>> {
        self.translate(source.id()).map(Handle::from_id)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.graph.find(name)
    }

    pub fn stochastic_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Stochastic)
    }

    pub fn deterministic_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Deterministic)
    }

    pub fn constant_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Constant)
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.graph.kind(id).map(|k| k == kind).unwrap_or(false))
            .collect()
    }

    /// Joint log-probability: sum over every stochastic node.
    pub fn ln_probability(&mut self) -> Result<f64, ModelError> {
        self.sum_ln_probability(|_| true)
    }

    /// Sum over unclamped stochastic nodes.
    pub fn ln_prior(&mut self) -> Result<f64, ModelError> {
        self.sum_ln_probability(|clamped| !clamped)
    }

    /// Sum over clamped stochastic nodes.
    pub fn ln_likelihood(&mut self) -> Result<f64, ModelError> {
        self.sum_ln_probability(|clamped| clamped)
    }

    fn sum_ln_probability(&mut self, include: impl Fn(bool) -> bool) -> Result<f64, ModelError> {
        let mut total = 0.0;
        for id in self.stochastic_nodes() {
            if include(self.graph.is_clamped(id)?) {
                total += self.graph.ln_probability(id)?;
            }
        }
        Ok(total)
    }

    /// Draws every unclamped stochastic node from its distribution, parents
    /// first, committing each draw.
    pub fn redraw_unclamped(&mut self, rng: &mut dyn RngCore) -> Result<(), ModelError> {
        for id in self.stochastic_nodes() {
            if self.graph.is_clamped(id)? {
                continue;
            }
            self.graph.redraw(id, rng)?;
            self.graph.keep(id)?;
        }
        Ok(())
    }

    /// Recomputes the topological order after the graph was rewired.
    pub fn reorder(&mut self) -> Result<(), ModelError> {
        let live: FxHashSet<NodeId> = self.graph.node_ids().collect();
        self.order = topological_order(&self.graph, &live)?;
        self.sinks.retain(|sink| live.contains(sink));
        Ok(())
    }

    /// Checks edge symmetry and that the stored order is topological.
    pub fn validate(&self) -> Result<(), ModelError> {
        let position: FxHashMap<NodeId, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, idx))
            .collect();
        if position.len() != self.graph.len() {
            return Err(ModelError::Internal(format!(
                "model order covers {} of {} nodes",
                position.len(),
                self.graph.len()
            )));
        }

        for (idx, &id) in self.order.iter().enumerate() {
            let entry = self.graph.entry(id)?;
            for &parent in &entry.parents {
                if !self.graph.entry(parent)?.children.contains(&id) {
                    return Err(ModelError::Internal(format!(
                        "parent {} of {} does not list it as a child",
                        parent, id
                    )));
                }
                if position.get(&parent).map_or(true, |&p| p >= idx) {
                    return Err(ModelError::Internal(format!(
                        "parent {} is not ordered before {}",
                        parent, id
                    )));
                }
            }
            for &child in &entry.children {
                if !self.graph.entry(child)?.parents.contains(&id) {
                    return Err(ModelError::Internal(format!(
                        "child {} of {} does not list it as a parent",
                        child, id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm restricted to `nodes`; ties resolve by ascending id.
fn topological_order(
    graph: &ModelGraph,
    nodes: &FxHashSet<NodeId>,
) -> Result<Vec<NodeId>, ModelError> {
    let mut indegree: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut ready = BTreeSet::new();
    for &id in nodes {
        let count = graph
            .entry(id)?
            .parents
            .iter()
            .filter(|parent| nodes.contains(parent))
            .count();
        if count == 0 {
            ready.insert(id);
        }
        indegree.insert(id, count);
    }

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for child in &graph.entry(id)?.children {
            if let Some(count) = indegree.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*child);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let mut stuck: Vec<NodeId> = indegree
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .map(|(id, _)| id)
            .collect();
        stuck.sort();
        return Err(ModelError::Construction(format!(
            "cycle detected among nodes {:?}",
            stuck
        )));
    }
    Ok(order)
}
