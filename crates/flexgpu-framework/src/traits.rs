//! Capability contracts between the host scheduler and the plugin
//!
//! The host invokes these at defined lifecycle points: `filter` in parallel
//! across candidate nodes, `score` in parallel across feasible nodes, then
//! `reserve`/`unreserve`/`bind` sequentially on the single chosen node.

use async_trait::async_trait;
use flexgpu_core::{FlexResult, Workload};
use std::collections::HashMap;
use uuid::Uuid;

use crate::decision::Decision;
use crate::snapshot::NodeSnapshot;

/// Read-only feasibility check for one candidate node.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    async fn filter(&self, workload: &Workload, snapshot: &NodeSnapshot) -> Decision;
}

/// Ranking of feasible nodes.
#[async_trait]
pub trait ScorePlugin: Send + Sync {
    /// Score the node for the workload; higher is preferred.
    async fn score(&self, workload: &Workload, snapshot: &NodeSnapshot) -> (i64, Decision);
}

/// Reservation of the chosen node, and its rollback.
#[async_trait]
pub trait ReservePlugin: Send + Sync {
    /// Commit a GPU index for the workload on the chosen node, writing it
    /// into the workload's annotations.
    async fn reserve(&self, workload: &mut Workload, snapshot: &NodeSnapshot) -> Decision;

    /// Erase a prior reservation. Unconditional and idempotent; called when
    /// the scheduling cycle aborts after reserve but before bind.
    async fn unreserve(&self, workload: &mut Workload);
}

/// Final commit of the placement.
#[async_trait]
pub trait BindPlugin: Send + Sync {
    async fn bind(&self, workload: &Workload, node_name: &str) -> Decision;
}

/// Final placement of a workload, handed to the external sink.
#[derive(Debug, Clone)]
pub struct BindRequest {
    /// Workload identifier
    pub workload_uid: Uuid,
    /// Workload name
    pub workload_name: String,
    /// Chosen node
    pub node_name: String,
    /// Accumulated metadata, including the committed GPU index annotation
    pub annotations: HashMap<String, String>,
}

/// External placement sink that persists bind requests.
///
/// Failures are surfaced to the host; the plugin never retries a bind.
#[async_trait]
pub trait PlacementSink: Send + Sync {
    async fn place(&self, request: BindRequest) -> FlexResult<()>;
}
