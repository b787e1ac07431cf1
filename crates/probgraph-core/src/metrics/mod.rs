//! Diagnostics for model graphs and moves.
//!
//! - `node_report` / `model_report`: per-node structure and state
//! - `MoveSummary` / `format_move_summaries`: acceptance table for a set of moves
//!
//! Notes:
//! - Reports read values through the graph, so stale deterministic nodes are
//!   recomputed while reporting.
//! - Model reports follow topological order.

use std::fmt;
use std::fmt::Write as _;

use crate::engine::errors::ModelError;
use crate::engine::graph::{ModelGraph, NodeKind};
use crate::engine::model::Model;
use crate::engine::value::NodeId;
use crate::moves::MetropolisHastingsMove;

/// Structure and state of one node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeReport {
    pub id: NodeId,
    pub name: Option<String>,
    pub kind: NodeKind,
    /// Name of the attached distribution or function.
    pub collaborator: Option<String>,
    /// Debug rendering of the current value.
    pub value: String,
    pub clamped: bool,
    pub touched: bool,
    pub changed: bool,
    /// Present for stochastic nodes only.
    pub ln_probability: Option<f64>,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    pub holds: u32,
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "_id           = {}", self.id)?;
        writeln!(f, "_name         = {}", self.name.as_deref().unwrap_or("<anonymous>"))?;
        writeln!(f, "_kind         = {}", self.kind)?;
        if let Some(collaborator) = &self.collaborator {
            writeln!(f, "_attached     = {}", collaborator)?;
        }
        writeln!(f, "_value        = {}", self.value)?;
        if self.kind == NodeKind::Stochastic {
            writeln!(f, "_clamped      = {}", self.clamped)?;
        }
        if let Some(ln_probability) = self.ln_probability {
            writeln!(f, "_lnProb       = {}", ln_probability)?;
        }
        writeln!(f, "_touched      = {}", self.touched)?;
        writeln!(f, "_changed      = {}", self.changed)?;
        writeln!(f, "_parents      = {}", join_ids(&self.parents))?;
        writeln!(f, "_children     = {}", join_ids(&self.children))?;
        write!(f, "_holds        = {}", self.holds)
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    let rendered: Vec<String> = ids.iter().map(NodeId::to_string).collect();
    format!("[ {} ]", rendered.join(", "))
}

/// Builds the report of one node.
pub fn node_report(graph: &mut ModelGraph, id: NodeId) -> Result<NodeReport, ModelError> {
    let value = graph.value_debug(id)?;
    let kind = graph.kind(id)?;
    let ln_probability = match kind {
        NodeKind::Stochastic => Some(graph.ln_probability(id)?),
        _ => None,
    };
    Ok(NodeReport {
        id,
        name: graph.name(id)?.map(str::to_owned),
        kind,
        collaborator: graph.collaborator_name(id)?.map(str::to_owned),
        value,
        clamped: graph.is_clamped(id)?,
        touched: graph.is_touched(id)?,
        changed: graph.is_changed(id)?,
        ln_probability,
        parents: graph.parents(id)?.to_vec(),
        children: graph.children(id)?,
        holds: graph.holds(id)?,
    })
}

/// Reports for every node of a model, in topological order.
pub fn model_report(model: &mut Model) -> Result<Vec<NodeReport>, ModelError> {
    let order = model.nodes().to_vec();
    order
        .into_iter()
        .map(|id| node_report(model.graph_mut(), id))
        .collect()
}

/// One row of the move acceptance table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoveSummary {
    pub name: String,
    pub nodes: Vec<NodeId>,
    pub weight: f64,
    pub tried: u64,
    pub accepted: u64,
    pub acceptance_rate: f64,
    pub tuning_parameter: Option<f64>,
}

impl MoveSummary {
    /// Summary over the whole run, or over the current tuning period.
    pub fn from_move(mv: &MetropolisHastingsMove, current_period: bool) -> Self {
        let stats = mv.stats();
        let (tried, accepted, acceptance_rate) = if current_period {
            (
                stats.tried_period,
                stats.accepted_period,
                stats.period_acceptance_rate(),
            )
        } else {
            (stats.tried_total, stats.accepted_total, stats.acceptance_rate())
        };
        Self {
            name: mv.name().to_owned(),
            nodes: mv.nodes().to_vec(),
            weight: mv.weight(),
            tried,
            accepted,
            acceptance_rate,
            tuning_parameter: mv.proposal().tuning_parameter(),
        }
    }
}

/// Renders summaries as a fixed-width table with a header row.
pub fn format_move_summaries(summaries: &[MoveSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<16} {:>8} {:>10} {:>10} {:>8} {:>12}",
        "move", "nodes", "weight", "tried", "accepted", "ratio", "tuning"
    );
    for summary in summaries {
        let tuning = summary
            .tuning_parameter
            .map(|value| format!("{:.4}", value))
            .unwrap_or_else(|| "-".to_owned());
        let nodes: Vec<String> = summary.nodes.iter().map(NodeId::to_string).collect();
        let _ = writeln!(
            out,
            "{:<16} {:<16} {:>8.3} {:>10} {:>10} {:>8.4} {:>12}",
            summary.name,
            nodes.join(","),
            summary.weight,
            summary.tried,
            summary.accepted,
            summary.acceptance_rate,
            tuning
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Exponential, Sum};
    use crate::moves::{MoveConfig, ScaleProposal};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn node_report_describes_structure() {
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 2.0_f64).expect("rate");
        let x = g.add_stochastic("x", Exponential::new(rate), 1.0).expect("x");
        let s = g.add_deterministic("", Sum::new(vec![x, rate])).expect("s");

        let report = node_report(&mut g, x.id()).expect("report");
        assert_eq!(report.kind, NodeKind::Stochastic);
        assert_eq!(report.collaborator.as_deref(), Some("exponential"));
        assert_eq!(report.value, "1.0");
        assert_eq!(report.parents, vec![rate.id()]);
        assert_eq!(report.children, vec![s.id()]);
        assert!((report.ln_probability.expect("lnp") - (2.0_f64.ln() - 2.0)).abs() < 1e-12);

        let sum_report = node_report(&mut g, s.id()).expect("report");
        assert_eq!(sum_report.value, "3.0");
        assert!(sum_report.ln_probability.is_none());
        assert!(sum_report.to_string().contains("<anonymous>"));
    }

    #[test]
    fn move_summary_table_lists_every_move() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut g = ModelGraph::new();
        let rate = g.add_constant("rate", 1.0_f64).expect("rate");
        let x = g.add_stochastic("x", Exponential::new(rate), 1.0).expect("x");
        let mut mv = MetropolisHastingsMove::new(
            &g,
            ScaleProposal::new(x, 1.0).expect("scale"),
            MoveConfig::default(),
        )
        .expect("move");
        for _ in 0..4 {
            mv.perform(&mut g, &mut rng).expect("perform");
            mv.reject(&mut g).expect("reject");
        }

        let summary = MoveSummary::from_move(&mv, false);
        assert_eq!(summary.tried, 4);
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.tuning_parameter, Some(1.0));

        let table = format_move_summaries(&[summary]);
        assert_eq!(table.lines().count(), 2);
        assert!(table.lines().nth(1).expect("row").starts_with("scale"));
    }
}
