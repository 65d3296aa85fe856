//! Approximate inference over discrete graphical models by cluster-graph
//! belief propagation.
//!
//! A [`ClusterGraph`] is built from a list of factors: factors are reduced by
//! the observed evidence, factors whose scope is a strict subset of another
//! factor are absorbed into it, and the remaining factors become clusters.
//! Clusters are connected through sepsets chosen so that, for every variable,
//! the clusters containing it form a tree (running intersection property).
//! Messages are then passed greedily, always along the path with the largest
//! expected information gain, until the graph is calibrated.

pub mod factors;
pub mod inference;
pub(crate) mod utils;

pub use factors::{Categorical, CategoricalTemplate, Evidence, Factor};
pub use inference::{ClusterGraph, ClusterId, MessagePath, PathId, DEFAULT_MAX_ITER, DEFAULT_TOL};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CgError {
    #[error("The cardinalities ({cards}) and var_names ({vars}) lists should be the same length.")]
    CardinalitiesLength { cards: usize, vars: usize },
    #[error("Tensor has dimension {got}, expected one axis per variable ({expected}).")]
    RankMismatch { expected: usize, got: usize },
    #[error("Assignment {assignment:?} is not consistent with the cardinalities {cardinalities:?}.")]
    AssignmentOutOfRange {
        assignment: Vec<usize>,
        cardinalities: Vec<usize>,
    },
    #[error("Negative probability {prob} for assignment {assignment:?}.")]
    NegativeProbability { assignment: Vec<usize>, prob: f64 },
    #[error("Variable {0} appears more than once in a factor scope.")]
    DuplicateVar(String),
    #[error("Inconsistent cardinalities for variable {var}: {left} and {right}.")]
    CardinalityMismatch {
        var: String,
        left: usize,
        right: usize,
    },
    #[error("Variable sets differ: {left:?} and {right:?}.")]
    VarSetMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },
    #[error("No variable named {0} in factor scope.")]
    UnknownVar(String),
    #[error("Observed value {value} out of range for variable {var} with cardinality {card}.")]
    EvidenceOutOfRange {
        var: String,
        value: usize,
        card: usize,
    },
    #[error("Got {values} values for {vars} observed variables.")]
    EvidenceLength { vars: usize, values: usize },
    #[error("Cannot cancel a zero-probability cell from a non-zero cell (assignment {0:?}).")]
    InconsistentCancel(Vec<usize>),
    #[error("Negative KL-divergence: {0}.")]
    NegativeKlDivergence(f64),
    #[error("At least one factor is required to build a cluster graph.")]
    NoFactors,
    #[error("Non-unique cluster id: {0}.")]
    DuplicateClusterId(String),
    #[error("Empty sepset between clusters {0} and {1}.")]
    EmptySepset(String, String),
    #[error("No cluster with variables containing {0:?}.")]
    NoCoveringCluster(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Show a progress bar while passing messages.
    show_progress: bool,
    /// Computation time after which the progress bar is displayed.
    /// This avoids showing progress bars for negligible amounts of time.
    progress_min_time: std::time::Duration,
}

impl Config {
    pub fn with_default_timing() -> Self {
        Self {
            show_progress: true,
            progress_min_time: std::time::Duration::from_millis(500),
        }
    }
    pub fn no_progress() -> Self {
        Self {
            show_progress: false,
            progress_min_time: std::time::Duration::ZERO,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::no_progress()
    }
}
