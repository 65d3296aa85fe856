//! Cluster graph construction and greedy message passing.
//!
//! The graph owns its clusters and its message paths (two per edge). Paths refer to clusters by
//! index, and after every message is passed the graph recomputes the messages of the paths that
//! leave the receiving cluster, since that cluster's belief changed.
//!
//! Message passing is asynchronous: at every step, the message with the largest information gain
//! (KL-divergence from the previous message sent on the same path) is passed, until no message
//! would bring more than `tol` information.

use hytra::TrAdder;
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use tracing::{debug, trace};

use super::cg_build::{self, Sepsets};
use super::{Cluster, ClusterId, MessagePath, PathId};
use crate::factors::{subset_evidence, Categorical, Evidence, Factor};
use crate::{CgError, Config, Result};

pub const DEFAULT_TOL: f64 = 1e-3;
pub const DEFAULT_MAX_ITER: usize = 50;

#[derive(Debug, Clone)]
pub struct ClusterGraph<F: Factor = Categorical> {
    clusters: Vec<Cluster<F>>,
    message_paths: Vec<MessagePath<F>>,
    // sepset of every edge, keyed by (i, j) with i < j
    sepsets: Sepsets,
    special_evidence: Evidence,
    // last message passed on every edge, in either direction
    last_passed_messages: IndexMap<(ClusterId, ClusterId), F>,
    num_messages_passed: usize,
    // max information gain over all paths after every message pass of the last run
    max_information_gains: Vec<f64>,
    // (sender, receiver) of every message passed in the last run
    passed_messages: Vec<(ClusterId, ClusterId)>,
}

fn edge_key(a: ClusterId, b: ClusterId) -> (ClusterId, ClusterId) {
    (a.min(b), a.max(b))
}

impl<F: Factor> ClusterGraph<F> {
    /// Build a cluster graph from a list of factors.
    ///
    /// `evidence` is used to reduce the factors before building the graph. `special_evidence` is
    /// not used to reduce the factors, but is observed when computing messages and marginals.
    /// Evidence variables never appear in sepsets.
    pub fn new(
        factors: &[F],
        evidence: Option<&Evidence>,
        special_evidence: &Evidence,
    ) -> Result<Self> {
        if factors.is_empty() {
            return Err(CgError::NoFactors);
        }
        cg_build::check_cardinalities(factors)?;
        let mut all_evidence_vars: IndexSet<String> = special_evidence.keys().cloned().collect();
        if let Some(evidence) = evidence {
            all_evidence_vars.extend(evidence.keys().cloned());
        }
        let reduced = cg_build::evidence_reduce_factors(factors, evidence)?;
        let cluster_factors = cg_build::absorb_subset_factors(reduced)?;

        let mut clusters: Vec<Cluster<F>> = cluster_factors
            .into_iter()
            .enumerate()
            .map(|(i, f)| Cluster::new(i, f))
            .collect();
        let sepsets = {
            let scopes: Vec<&[String]> = clusters.iter().map(|c| c.var_names()).collect();
            let non_rip = cg_build::non_rip_sepsets(&scopes, &all_evidence_vars);
            cg_build::running_intersection_sepsets(&scopes, &non_rip)
        };
        for cluster in clusters.iter_mut() {
            let (vars, values) = subset_evidence(special_evidence, cluster.var_names());
            cluster.add_special_evidence(vars.into_iter().zip(values).collect());
        }

        let mut graph = Self {
            clusters,
            message_paths: Vec::new(),
            sepsets,
            special_evidence: special_evidence.clone(),
            last_passed_messages: IndexMap::new(),
            num_messages_passed: 0,
            max_information_gains: Vec::new(),
            passed_messages: Vec::new(),
        };
        graph.build_graph()?;
        Ok(graph)
    }

    /// Connect the clusters along the sepsets and create the message paths.
    fn build_graph(&mut self) -> Result<()> {
        let mut names = IndexSet::new();
        for cluster in self.clusters.iter() {
            if !names.insert(cluster.name()) {
                return Err(CgError::DuplicateClusterId(cluster.name().to_owned()));
            }
        }
        for cluster in self.clusters.iter_mut() {
            cluster.remove_all_neighbours();
        }
        for ((i, j), sepset) in self.sepsets.iter() {
            let (i, j) = (*i, *j);
            if sepset.is_empty() {
                return Err(CgError::EmptySepset(
                    self.clusters[i].name().to_owned(),
                    self.clusters[j].name().to_owned(),
                ));
            }
            self.clusters[i].add_neighbour(j, sepset.clone());
            self.clusters[j].add_neighbour(i, sepset.clone());
            for (sender, receiver) in [(i, j), (j, i)] {
                let message = self.clusters[sender].make_message(receiver)?;
                let path_id = self.message_paths.len();
                self.message_paths
                    .push(MessagePath::new(sender, receiver, message)?);
                self.clusters[sender].add_outward_message_path(path_id);
            }
        }
        debug!(
            n_clusters = self.clusters.len(),
            n_edges = self.sepsets.len(),
            n_paths = self.message_paths.len(),
            "built cluster graph"
        );
        Ok(())
    }

    pub fn clusters(&self) -> &[Cluster<F>] {
        &self.clusters
    }
    pub fn message_paths(&self) -> &[MessagePath<F>] {
        &self.message_paths
    }
    /// Sepset of every edge, as `((i, j), sepset)` with `i < j`.
    pub fn sepsets(&self) -> impl Iterator<Item = ((ClusterId, ClusterId), &[String])> {
        self.sepsets.iter().map(|(e, s)| (*e, s.as_slice()))
    }
    /// Edges as (cluster name, cluster name, sepset).
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.sepsets.iter().map(|((i, j), s)| {
            (
                self.clusters[*i].name(),
                self.clusters[*j].name(),
                s.as_slice(),
            )
        })
    }
    pub fn special_evidence(&self) -> &Evidence {
        &self.special_evidence
    }
    /// Number of messages passed since the graph was built.
    pub fn num_messages_passed(&self) -> usize {
        self.num_messages_passed
    }
    /// Largest information gain over all paths after each message pass of the last run.
    pub fn max_information_gains(&self) -> &[f64] {
        &self.max_information_gains
    }
    /// (sender, receiver) of each message passed in the last run.
    pub fn passed_messages(&self) -> &[(ClusterId, ClusterId)] {
        &self.passed_messages
    }

    /// Pass messages until the information gain of every message is at most `tol`, or
    /// `max_iter * (number of message paths)` messages have been passed.
    ///
    /// Reaching the message budget without convergence is not an error: the convergence trace
    /// is available through [`Self::max_information_gains`].
    pub fn process_graph(&mut self, tol: f64, max_iter: usize, config: &Config) -> Result<()> {
        self.max_information_gains.clear();
        self.passed_messages.clear();
        if self.clusters.len() == 1 {
            // No message to pass, only observe the special evidence.
            let belief = self.clusters[0].observed_belief()?;
            self.clusters[0].set_belief(belief);
            debug!("single cluster graph, no message passing");
            return Ok(());
        }
        let max_passes = max_iter.saturating_mul(self.message_paths.len());
        crate::utils::with_progress(
            |pass_cnt| self.pass_messages(tol, max_passes, pass_cnt),
            max_passes as u64,
            "Message passing",
            config,
        )
    }

    fn pass_messages(&mut self, tol: f64, max_passes: usize, pass_cnt: &TrAdder<u64>) -> Result<()> {
        let mut order: Vec<PathId> = (0..self.message_paths.len()).collect();
        self.sort_by_information_gain(&mut order);
        for _ in 0..max_passes {
            self.pass_next_message(order[0])?;
            pass_cnt.inc(1);
            self.sort_by_information_gain(&mut order);
            let max_gain = self.message_paths[order[0]].next_information_gain();
            self.max_information_gains.push(max_gain);
            if max_gain <= tol {
                debug!(
                    n_passes = self.passed_messages.len(),
                    max_gain, "message passing converged"
                );
                return Ok(());
            }
        }
        debug!(
            n_passes = self.passed_messages.len(),
            max_gain = self.max_information_gains.last().copied(),
            "message budget exhausted before convergence"
        );
        Ok(())
    }

    /// Stable sort of paths by decreasing information gain.
    fn sort_by_information_gain(&self, order: &mut [PathId]) {
        order.sort_by(|a, b| {
            self.message_paths[*b]
                .next_information_gain()
                .total_cmp(&self.message_paths[*a].next_information_gain())
        });
    }

    /// Send the next message of `path_id`, then recompute the messages leaving its receiver.
    fn pass_next_message(&mut self, path_id: PathId) -> Result<()> {
        let sender = self.message_paths[path_id].sender();
        let receiver = self.message_paths[path_id].receiver();
        trace!(
            sender = self.clusters[sender].name(),
            receiver = self.clusters[receiver].name(),
            gain = self.message_paths[path_id].next_information_gain(),
            "passing message"
        );
        let message = self.message_paths[path_id].mark_sent();
        self.clusters[receiver].receive_message(sender, message.clone())?;
        self.clusters[sender].record_sent_message(receiver, message.clone());
        self.last_passed_messages
            .insert(edge_key(sender, receiver), message);
        self.num_messages_passed += 1;
        self.passed_messages.push((sender, receiver));

        let receiver_cluster = &self.clusters[receiver];
        let outward = receiver_cluster.outward_message_paths();
        let messages = outward
            .par_iter()
            .map(|p| receiver_cluster.make_message(self.message_paths[*p].receiver()))
            .collect::<Result<Vec<_>>>()?;
        for (p, message) in outward.iter().zip(messages) {
            self.message_paths[*p].set_next_message(message)?;
        }
        Ok(())
    }

    /// Marginal over `vars` of the first cluster whose scope contains them.
    pub fn get_marginal<S: AsRef<str>>(&self, vars: &[S]) -> Result<F> {
        let vars: Vec<String> = vars.iter().map(|v| v.as_ref().to_owned()).collect();
        for cluster in self.clusters.iter() {
            if vars.iter().all(|v| cluster.var_names().contains(v)) {
                return cluster.observed_belief()?.marginalize(&vars, true);
            }
        }
        Err(CgError::NoCoveringCluster(vars))
    }

    /// Joint distribution over all variables: product of the cluster beliefs with the last
    /// message passed on every edge cancelled out.
    pub fn get_posterior_joint(&self) -> Result<F> {
        let mut clusters = self.clusters.iter();
        let Some(first) = clusters.next() else {
            return Err(CgError::NoFactors);
        };
        let mut joint = first.belief().clone();
        for cluster in clusters {
            joint = joint.multiply(cluster.belief())?;
        }
        let mut messages = self.last_passed_messages.values();
        let Some(first) = messages.next() else {
            debug_assert_eq!(self.num_messages_passed, 0);
            return Ok(joint);
        };
        let mut message_product = first.clone();
        for message in messages {
            message_product = message_product.multiply(message)?;
        }
        joint.cancel(&message_product)
    }
}
