//! Construction steps of the cluster graph: from input factors to clusters and sepsets.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use petgraph::algo::min_spanning_tree;
use petgraph::data::Element;
use petgraph::graph::{NodeIndex, UnGraph};

use super::ClusterId;
use crate::factors::{subset_evidence, Evidence, Factor};
use crate::{CgError, Result};

/// Sepsets keyed by cluster pairs `(i, j)` with `i < j`.
pub(super) type Sepsets = IndexMap<(ClusterId, ClusterId), Vec<String>>;

/// Check that every variable has the same cardinality in all the factors.
pub(super) fn check_cardinalities<F: Factor>(factors: &[F]) -> Result<()> {
    let mut cards: IndexMap<&str, usize> = IndexMap::new();
    for factor in factors {
        for var in factor.var_names() {
            let Some(card) = factor.cardinality(var) else {
                continue;
            };
            let known = *cards.entry(var.as_str()).or_insert(card);
            if known != card {
                return Err(CgError::CardinalityMismatch {
                    var: var.clone(),
                    left: known,
                    right: card,
                });
            }
        }
    }
    Ok(())
}

/// Observe the relevant evidence in each factor.
///
/// The returned factors are copies: the graph never aliases its input.
pub(super) fn evidence_reduce_factors<F: Factor>(
    factors: &[F],
    evidence: Option<&Evidence>,
) -> Result<Vec<F>> {
    factors
        .iter()
        .map(|factor| match evidence {
            Some(evidence) => {
                let (vars, values) = subset_evidence(evidence, factor.var_names());
                if vars.is_empty() {
                    Ok(factor.clone())
                } else {
                    factor.reduce(&vars, &values)
                }
            }
            None => Ok(factor.clone()),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Absorption {
    Unprocessed,
    AbsorbedInto(usize),
    Absorber,
}

fn is_strict_subset(small: &[String], large: &[String]) -> bool {
    small.len() < large.len() && small.iter().all(|v| large.contains(v))
}

/// Multiply every factor whose scope is a strict subset of another factor's scope into the
/// latter.
///
/// This is a single pass over all pairs: factor `i` absorbs every still unprocessed factor whose
/// scope is a strict subset of the (growing) product for `i`. Absorbing factors come first in the
/// result, followed by the factors that were neither absorbed nor absorbing, both in input order.
pub(super) fn absorb_subset_factors<F: Factor>(factors: Vec<F>) -> Result<Vec<F>> {
    let n = factors.len();
    let mut state = vec![Absorption::Unprocessed; n];
    let mut absorbers = Vec::new();
    for i in 0..n {
        if state[i] != Absorption::Unprocessed {
            continue;
        }
        let mut product = factors[i].clone();
        for j in 0..n {
            if i == j || state[j] != Absorption::Unprocessed {
                continue;
            }
            if is_strict_subset(factors[j].var_names(), product.var_names()) {
                product = product.multiply(&factors[j])?;
                state[j] = Absorption::AbsorbedInto(i);
                state[i] = Absorption::Absorber;
            }
        }
        if state[i] == Absorption::Absorber {
            absorbers.push(product);
        }
    }
    let standalone = factors
        .into_iter()
        .zip(state.iter())
        .filter(|(_, s)| **s == Absorption::Unprocessed)
        .map(|(f, _)| f);
    let res: Vec<F> = absorbers.into_iter().chain(standalone).collect();
    let mut n_absorbed = 0;
    for (j, s) in state.iter().enumerate() {
        if let Absorption::AbsorbedInto(i) = s {
            tracing::trace!(factor = j, into = *i, "factor absorbed");
            n_absorbed += 1;
        }
    }
    assert_eq!(
        res.len() + n_absorbed,
        n,
        "some factors were not included during subset absorption"
    );
    tracing::debug!(
        n_factors = n,
        n_absorbed,
        n_clusters = res.len(),
        "absorbed subset factors"
    );
    Ok(res)
}

/// Shared variables of every pair of clusters, evidence variables excluded.
pub(super) fn non_rip_sepsets(scopes: &[&[String]], evidence_vars: &IndexSet<String>) -> Sepsets {
    (0..scopes.len())
        .tuple_combinations()
        .map(|(i, j)| {
            let sepset = scopes[i]
                .iter()
                .filter(|v| scopes[j].contains(*v) && !evidence_vars.contains(*v))
                .cloned()
                .collect();
            ((i, j), sepset)
        })
        .collect()
}

/// Minimum spanning tree of the clusters sharing each variable.
///
/// For each variable, the graph has one node per cluster that shares the variable with another
/// cluster and an edge of weight 1 between every such pair of clusters. Variables appear in the
/// order of their first occurrence in `scopes`.
pub(super) fn vars_min_spanning_trees(
    scopes: &[&[String]],
    non_rip: &Sepsets,
) -> IndexMap<String, Vec<(ClusterId, ClusterId)>> {
    let all_vars: IndexSet<&String> = scopes.iter().flat_map(|s| s.iter()).collect();
    let mut var_graphs: IndexMap<&String, (UnGraph<ClusterId, u32>, IndexMap<ClusterId, NodeIndex>)> =
        all_vars
            .iter()
            .map(|v| (*v, (UnGraph::default(), IndexMap::new())))
            .collect();
    for ((i, j), sepset) in non_rip {
        for var in sepset {
            let (graph, nodes) = &mut var_graphs[var];
            let a = *nodes.entry(*i).or_insert_with(|| graph.add_node(*i));
            let b = *nodes.entry(*j).or_insert_with(|| graph.add_node(*j));
            graph.add_edge(a, b, 1);
        }
    }
    var_graphs
        .into_iter()
        .map(|(var, (graph, _))| {
            let edges = min_spanning_tree(&graph)
                .filter_map(|elt| match elt {
                    Element::Edge { source, target, .. } => {
                        let (a, b) = (graph[NodeIndex::new(source)], graph[NodeIndex::new(target)]);
                        Some((a.min(b), a.max(b)))
                    }
                    Element::Node { .. } => None,
                })
                .collect();
            (var.clone(), edges)
        })
        .collect()
}

/// Sepsets that satisfy the running intersection property.
///
/// An edge is kept if it belongs to the spanning tree of at least one variable, and its sepset is
/// the set of variables whose spanning tree contains it. The clusters containing a variable are
/// thus connected by a tree of edges whose sepsets contain that variable.
pub(super) fn running_intersection_sepsets(scopes: &[&[String]], non_rip: &Sepsets) -> Sepsets {
    let mut edge_sepsets = Sepsets::new();
    for (var, tree) in vars_min_spanning_trees(scopes, non_rip) {
        for edge in tree {
            edge_sepsets.entry(edge).or_default().push(var.clone());
        }
    }
    edge_sepsets.sort_keys();
    edge_sepsets
}
