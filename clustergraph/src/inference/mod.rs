mod cg_build;
mod cluster;
mod cluster_graph;
mod message_path;

pub use cluster::Cluster;
pub use cluster_graph::{ClusterGraph, DEFAULT_MAX_ITER, DEFAULT_TOL};
pub use message_path::MessagePath;

/// Index of a cluster in its graph.
pub type ClusterId = usize;
/// Index of a directed message path in its graph.
pub type PathId = usize;
