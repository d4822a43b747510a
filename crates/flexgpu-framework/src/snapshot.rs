//! Immutable per-cycle view of a candidate node

use flexgpu_core::{Node, Workload};
use serde::{Deserialize, Serialize};

/// A candidate node and the workloads currently placed on it, captured at
/// the start of a scheduling cycle.
///
/// The snapshot is shared read-only across parallel feasibility checks; the
/// plugin rebuilds its capacity model from it on every call and never caches
/// a model across phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// The node record
    pub node: Node,
    /// Workloads currently placed on the node
    pub workloads: Vec<Workload>,
}

impl NodeSnapshot {
    pub fn new(node: Node, workloads: Vec<Workload>) -> Self {
        Self { node, workloads }
    }
}
