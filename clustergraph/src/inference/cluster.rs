use indexmap::IndexMap;

use super::{ClusterId, PathId};
use crate::factors::{subset_evidence, Evidence, Factor};
use crate::Result;

/// A node of the cluster graph: a belief over the cluster scope, and one sepset per neighbour.
#[derive(Debug, Clone)]
pub struct Cluster<F: Factor> {
    name: String,
    belief: F,
    special_evidence: Evidence,
    // sepset variables for each neighbour
    sepsets: IndexMap<ClusterId, Vec<String>>,
    // last message passed on the edge with each neighbour, in either direction
    sepset_beliefs: IndexMap<ClusterId, F>,
    outward_message_paths: Vec<PathId>,
}

impl<F: Factor> Cluster<F> {
    pub(super) fn new(id: ClusterId, factor: F) -> Self {
        let name = format!("c{}#[{}]", id, factor.var_names().join(", "));
        Self {
            name,
            belief: factor,
            special_evidence: Evidence::new(),
            sepsets: IndexMap::new(),
            sepset_beliefs: IndexMap::new(),
            outward_message_paths: Vec::new(),
        }
    }

    /// Unique name of the cluster, built from its index and scope.
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn var_names(&self) -> &[String] {
        self.belief.var_names()
    }
    /// Current belief (the initial factor until messages are received).
    pub fn belief(&self) -> &F {
        &self.belief
    }
    pub fn neighbours(&self) -> impl Iterator<Item = (ClusterId, &[String])> {
        self.sepsets.iter().map(|(n, s)| (*n, s.as_slice()))
    }
    pub fn sepset(&self, neighbour: ClusterId) -> Option<&[String]> {
        self.sepsets.get(&neighbour).map(Vec::as_slice)
    }
    pub fn outward_message_paths(&self) -> &[PathId] {
        &self.outward_message_paths
    }
    pub fn special_evidence(&self) -> &Evidence {
        &self.special_evidence
    }

    /// Evidence used when computing messages and marginals instead of reducing the belief.
    pub(super) fn add_special_evidence(&mut self, evidence: Evidence) {
        self.special_evidence.extend(evidence);
    }
    pub(super) fn remove_all_neighbours(&mut self) {
        self.sepsets.clear();
        self.sepset_beliefs.clear();
        self.outward_message_paths.clear();
    }
    pub(super) fn add_neighbour(&mut self, neighbour: ClusterId, sepset: Vec<String>) {
        self.sepsets.insert(neighbour, sepset);
    }
    pub(super) fn add_outward_message_path(&mut self, path: PathId) {
        self.outward_message_paths.push(path);
    }

    /// Belief reduced by the special evidence of the cluster.
    pub(super) fn observed_belief(&self) -> Result<F> {
        let (vars, values) = subset_evidence(&self.special_evidence, self.belief.var_names());
        if vars.is_empty() {
            Ok(self.belief.clone())
        } else {
            self.belief.reduce(&vars, &values)
        }
    }

    /// Belief marginalized onto the sepset with `receiver`.
    ///
    /// Panics if `receiver` is not a neighbour.
    pub(super) fn make_message(&self, receiver: ClusterId) -> Result<F> {
        let sepset = &self.sepsets[&receiver];
        self.observed_belief()?.marginalize(sepset, true)
    }

    /// Absorb a message from `sender`, replacing the previous message on that edge.
    pub(super) fn receive_message(&mut self, sender: ClusterId, message: F) -> Result<()> {
        let mut belief = self.belief.multiply(&message)?;
        if let Some(previous) = self.sepset_beliefs.get(&sender) {
            belief = belief.cancel(previous)?;
        }
        self.belief = belief;
        self.sepset_beliefs.insert(sender, message);
        Ok(())
    }

    /// Record a message sent to `receiver` as the current belief of the sepset.
    pub(super) fn record_sent_message(&mut self, receiver: ClusterId, message: F) {
        self.sepset_beliefs.insert(receiver, message);
    }

    pub(super) fn set_belief(&mut self, belief: F) {
        self.belief = belief;
    }
}
