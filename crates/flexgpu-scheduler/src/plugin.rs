//! The FlexGPU plugin: filter, score, reserve and bind
//!
//! One instance serves a whole scheduler process. Filter and score run in
//! parallel across candidate nodes against a shared immutable snapshot;
//! reserve, unreserve and bind run sequentially for the single chosen node.
//! The capacity model is rebuilt fresh inside every call, so no model is
//! ever trusted across phases.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use flexgpu_core::{FlexError, FlexResult, Node, PluginConfig, Quantity, Workload};
use flexgpu_framework::{
    BindPlugin, BindRequest, Decision, FilterPlugin, NodeSnapshot, PlacementSink, ReservePlugin,
    ScorePlugin,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assume::{AssumeCache, AssumedAllocation};
use crate::node_model::NodeModel;
use crate::request::{classify, limit_sum, workloads_limit_sum, GpuRequest};

/// GPU-sharing scheduler plugin.
pub struct FlexGpuPlugin {
    config: PluginConfig,
    assume: AssumeCache,
    sink: Arc<dyn PlacementSink>,
}

impl FlexGpuPlugin {
    /// Plugin name reported to the host framework.
    pub const NAME: &'static str = "FlexGPU";

    pub fn new(config: PluginConfig, sink: Arc<dyn PlacementSink>) -> Self {
        Self {
            config,
            assume: AssumeCache::new(),
            sink,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Parse a node's allocatable quantity for one resource name.
    fn allocatable(&self, node: &Node, resource: &str) -> FlexResult<Quantity> {
        let raw = node
            .allocatable_raw(resource)
            .ok_or_else(|| FlexError::UnknownResourceType(resource.to_string()))?;
        Quantity::parse(resource, raw)
    }

    /// The feasibility check, as a hard-veto pipeline.
    async fn filter_inner(&self, workload: &Workload, snapshot: &NodeSnapshot) -> FlexResult<()> {
        let request = match classify(workload, &self.config)? {
            GpuRequest::None => {
                debug!(workload = %workload.name, "no GPU intent, passing through");
                return Ok(());
            }
            request => request,
        };

        let node = &snapshot.node;
        // A node that does not report both reserved resource names can never
        // host this workload.
        if !node.reports(&self.config.gpu_resource) {
            return Err(FlexError::UnknownResourceType(self.config.gpu_resource.clone()));
        }
        if !node.reports(&self.config.memory_resource) {
            return Err(FlexError::UnknownResourceType(
                self.config.memory_resource.clone(),
            ));
        }
        let gpu_allocatable = self.allocatable(node, &self.config.gpu_resource)?;
        let mem_allocatable = self.allocatable(node, &self.config.memory_resource)?;

        // Aggregate check: everything already committed or assumed on the
        // node, plus this request, against the declared totals.
        let assumed = self.assume.for_node(&node.name).await;
        let seen: HashSet<Uuid> = snapshot.workloads.iter().map(|w| w.uid).collect();

        let mut gpu_sum = workloads_limit_sum(&snapshot.workloads, &self.config.gpu_resource);
        let mut mem_sum = workloads_limit_sum(&snapshot.workloads, &self.config.memory_resource);
        for allocation in &assumed {
            if seen.contains(&allocation.workload_uid) {
                continue;
            }
            match allocation.request {
                GpuRequest::Exclusive(count) => gpu_sum += Quantity::from_bytes(count),
                GpuRequest::Shared(bytes) => mem_sum += bytes,
                GpuRequest::None => {}
            }
        }
        gpu_sum += limit_sum(workload, &self.config.gpu_resource)?.unwrap_or(Quantity::ZERO);
        mem_sum += limit_sum(workload, &self.config.memory_resource)?.unwrap_or(Quantity::ZERO);

        if gpu_sum > gpu_allocatable {
            debug!(
                node = %node.name,
                assumed = %gpu_sum,
                allocatable = %gpu_allocatable,
                "insufficient {}", self.config.gpu_resource
            );
            return Err(FlexError::CapacityExceeded(self.config.gpu_resource.clone()));
        }
        if mem_sum > mem_allocatable {
            debug!(
                node = %node.name,
                assumed = %mem_sum,
                allocatable = %mem_allocatable,
                "insufficient {}", self.config.memory_resource
            );
            return Err(FlexError::CapacityExceeded(
                self.config.memory_resource.clone(),
            ));
        }

        // Per-GPU fit: aggregate room is not enough, one slot must take it.
        let model = NodeModel::build(node, &snapshot.workloads, &assumed, &self.config)?;
        let fits = match request {
            GpuRequest::None => return Ok(()),
            GpuRequest::Exclusive(_) => model.exclusive_fit_indexes(),
            GpuRequest::Shared(bytes) => model.shared_fit_indexes(bytes),
        };
        debug!(node = %node.name, count = fits.len(), "fitting GPUs");
        if fits.is_empty() {
            return Err(FlexError::NoFitGpu);
        }

        Ok(())
    }

    async fn reserve_inner(
        &self,
        workload: &mut Workload,
        snapshot: &NodeSnapshot,
    ) -> FlexResult<()> {
        let request = match classify(workload, &self.config)? {
            GpuRequest::None => {
                debug!(workload = %workload.name, "no GPU intent, nothing to reserve");
                return Ok(());
            }
            request => request,
        };

        // The node may have changed since the feasibility pass; rebuild.
        let assumed = self.assume.for_node(&snapshot.node.name).await;
        let model = NodeModel::build(&snapshot.node, &snapshot.workloads, &assumed, &self.config)?;

        let fits = match request {
            GpuRequest::None => return Ok(()),
            GpuRequest::Exclusive(_) => model.exclusive_fit_indexes(),
            GpuRequest::Shared(bytes) => model.shared_fit_indexes(bytes),
        };
        let Some(&index) = fits.first() else {
            return Err(FlexError::NoFitGpu);
        };

        workload.set_gpu_index(&self.config.index_annotation, index);
        self.assume
            .assume(AssumedAllocation {
                workload_uid: workload.uid,
                node_name: snapshot.node.name.clone(),
                gpu_index: index,
                request,
            })
            .await;

        info!(
            workload = %workload.name,
            node = %snapshot.node.name,
            gpu = index,
            "reserved GPU"
        );
        Ok(())
    }
}

#[async_trait]
impl FilterPlugin for FlexGpuPlugin {
    async fn filter(&self, workload: &Workload, snapshot: &NodeSnapshot) -> Decision {
        match self.filter_inner(workload, snapshot).await {
            Ok(()) => Decision::Feasible,
            Err(err) => {
                debug!(
                    workload = %workload.name,
                    node = %snapshot.node.name,
                    error = %err,
                    "node filtered out"
                );
                Decision::from_error(&err)
            }
        }
    }
}

#[async_trait]
impl ScorePlugin for FlexGpuPlugin {
    /// Pack affinity: nodes already carrying GPU work score higher, keeping
    /// idle GPUs free for exclusive or large requests.
    async fn score(&self, workload: &Workload, snapshot: &NodeSnapshot) -> (i64, Decision) {
        let request = match classify(workload, &self.config) {
            Ok(GpuRequest::None) => return (0, Decision::Feasible),
            Ok(request) => request,
            Err(err) => return (0, Decision::from_error(&err)),
        };

        let assumed = self.assume.for_node(&snapshot.node.name).await;
        let model =
            match NodeModel::build(&snapshot.node, &snapshot.workloads, &assumed, &self.config) {
                Ok(model) => model,
                Err(err) => return (0, Decision::from_error(&err)),
            };

        let score = match request {
            // Fewer idle GPUs means tighter historical packing.
            GpuRequest::None | GpuRequest::Exclusive(_) => {
                model.gpu_count - model.idle_gpu_count()
            }
            // Used fraction of aggregate slot capacity, 0..100.
            GpuRequest::Shared(_) => {
                let total: Quantity = model.slots.iter().map(|s| s.capacity).sum();
                if total.is_zero() {
                    0
                } else {
                    let used = total - model.free_memory();
                    used.as_bytes() * 100 / total.as_bytes()
                }
            }
        };
        debug!(node = %snapshot.node.name, score, "scored node");
        (score, Decision::Feasible)
    }
}

#[async_trait]
impl ReservePlugin for FlexGpuPlugin {
    async fn reserve(&self, workload: &mut Workload, snapshot: &NodeSnapshot) -> Decision {
        match self.reserve_inner(workload, snapshot).await {
            Ok(()) => Decision::Feasible,
            Err(err) => {
                warn!(
                    workload = %workload.name,
                    node = %snapshot.node.name,
                    error = %err,
                    "reservation failed"
                );
                Decision::from_error(&err)
            }
        }
    }

    async fn unreserve(&self, workload: &mut Workload) {
        workload.clear_gpu_index(&self.config.index_annotation);
        self.assume.forget(workload.uid).await;
        debug!(workload = %workload.name, "reservation rolled back");
    }
}

#[async_trait]
impl BindPlugin for FlexGpuPlugin {
    async fn bind(&self, workload: &Workload, node_name: &str) -> Decision {
        let request = BindRequest {
            workload_uid: workload.uid,
            workload_name: workload.name.clone(),
            node_name: node_name.to_string(),
            annotations: workload.annotations.clone(),
        };

        info!(workload = %workload.name, node = %node_name, "binding workload");
        match self.sink.place(request).await {
            Ok(()) => {
                // The annotation is durable in the store now.
                self.assume.forget(workload.uid).await;
                Decision::Feasible
            }
            Err(err) => {
                let err = FlexError::BindRejected(err.to_string());
                warn!(workload = %workload.name, error = %err, "bind failed");
                Decision::from_error(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexgpu_core::Container;
    use std::sync::Mutex;

    /// Sink that records every bind request.
    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<BindRequest>>,
    }

    #[async_trait]
    impl PlacementSink for RecordingSink {
        async fn place(&self, request: BindRequest) -> FlexResult<()> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PlacementSink for FailingSink {
        async fn place(&self, _request: BindRequest) -> FlexResult<()> {
            Err(FlexError::Internal("store unavailable".to_string()))
        }
    }

    fn plugin() -> FlexGpuPlugin {
        FlexGpuPlugin::new(PluginConfig::default(), Arc::new(RecordingSink::default()))
    }

    fn config() -> PluginConfig {
        PluginConfig::default()
    }

    fn node(gpus: &str, memory: &str) -> Node {
        let mut node = Node::new("node-a");
        node.allocatable
            .insert(config().gpu_resource, gpus.to_string());
        node.allocatable
            .insert(config().memory_resource, memory.to_string());
        node
    }

    fn shared_workload(name: &str, bytes: &str) -> Workload {
        let mut workload = Workload::new(name);
        workload
            .containers
            .push(Container::with_limit("main", &config().memory_resource, bytes));
        workload
    }

    fn exclusive_workload(name: &str) -> Workload {
        let mut workload = Workload::new(name);
        workload
            .containers
            .push(Container::with_limit("main", &config().gpu_resource, "1"));
        workload
    }

    fn placed(mut workload: Workload, index: usize) -> Workload {
        workload.set_gpu_index(&config().index_annotation, index);
        workload
    }

    #[tokio::test]
    async fn test_filter_passes_through_without_gpu_intent() {
        let plugin = plugin();
        let workload = Workload::new("plain");
        // even a node reporting neither resource passes
        let snapshot = NodeSnapshot::new(Node::new("node-a"), vec![]);
        assert_eq!(plugin.filter(&workload, &snapshot).await, Decision::Feasible);
    }

    #[tokio::test]
    async fn test_filter_rejects_conflicting_request() {
        let plugin = plugin();
        let mut workload = shared_workload("conflicted", "1Gi");
        workload
            .containers
            .push(Container::with_limit("extra", &config().gpu_resource, "1"));
        let snapshot = NodeSnapshot::new(node("2", "16Gi"), vec![]);
        assert!(matches!(
            plugin.filter(&workload, &snapshot).await,
            Decision::UnschedulableAndUnresolvable(_)
        ));
    }

    #[tokio::test]
    async fn test_filter_rejects_unknown_resource_type() {
        let plugin = plugin();
        let workload = shared_workload("w", "1Gi");
        let mut bare = Node::new("node-a");
        bare.allocatable
            .insert(config().gpu_resource, "2".to_string());
        // memory resource missing entirely
        let snapshot = NodeSnapshot::new(bare, vec![]);
        assert!(matches!(
            plugin.filter(&workload, &snapshot).await,
            Decision::UnschedulableAndUnresolvable(_)
        ));
    }

    #[tokio::test]
    async fn test_filter_rejects_aggregate_capacity_exceeded() {
        let plugin = plugin();
        let snapshot = NodeSnapshot::new(
            node("2", "16"),
            vec![placed(shared_workload("a", "15"), 0)],
        );
        let workload = shared_workload("b", "2");
        assert!(matches!(
            plugin.filter(&workload, &snapshot).await,
            Decision::Unschedulable(_)
        ));
    }

    #[tokio::test]
    async fn test_filter_rejects_when_no_single_gpu_fits() {
        let plugin = plugin();
        // 8 per GPU; both carry 5, so aggregate room exists but no slot fits 4
        let snapshot = NodeSnapshot::new(
            node("2", "16"),
            vec![
                placed(shared_workload("a", "5"), 0),
                placed(shared_workload("b", "5"), 1),
            ],
        );
        let workload = shared_workload("c", "4");
        assert!(matches!(
            plugin.filter(&workload, &snapshot).await,
            Decision::Unschedulable(_)
        ));
    }

    #[tokio::test]
    async fn test_filter_malformed_capacity_is_recoverable_error() {
        let plugin = plugin();
        let workload = shared_workload("w", "1");
        let mut bad = Node::new("node-a");
        bad.allocatable
            .insert(config().gpu_resource, "two".to_string());
        bad.allocatable
            .insert(config().memory_resource, "16".to_string());
        let snapshot = NodeSnapshot::new(bad, vec![]);
        assert!(matches!(
            plugin.filter(&workload, &snapshot).await,
            Decision::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_filter_feasible() {
        let plugin = plugin();
        let snapshot = NodeSnapshot::new(
            node("2", "16"),
            vec![placed(shared_workload("a", "5"), 0)],
        );
        let workload = shared_workload("b", "3");
        assert_eq!(plugin.filter(&workload, &snapshot).await, Decision::Feasible);
    }

    /// The reference placement sequence: two GPUs, 16 bytes total, 8 each.
    #[tokio::test]
    async fn test_bin_pack_placement_sequence() {
        let plugin = plugin();
        let mut on_node: Vec<Workload> = Vec::new();

        // A: shared 5; both GPUs idle, tie breaks to index 0
        let mut a = shared_workload("a", "5");
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node.clone());
        assert_eq!(plugin.reserve(&mut a, &snapshot).await, Decision::Feasible);
        assert_eq!(a.gpu_index(&config().index_annotation).unwrap(), Some(0));
        on_node.push(a);

        // B: shared 2; GPU 0 would retain 1, GPU 1 would retain 6, best fit is 0
        let mut b = shared_workload("b", "2");
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node.clone());
        assert_eq!(plugin.reserve(&mut b, &snapshot).await, Decision::Feasible);
        assert_eq!(b.gpu_index(&config().index_annotation).unwrap(), Some(0));
        on_node.push(b);

        // C: exclusive; GPU 0 is used, GPU 1 qualifies
        let mut c = exclusive_workload("c");
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node.clone());
        assert_eq!(plugin.reserve(&mut c, &snapshot).await, Decision::Feasible);
        assert_eq!(c.gpu_index(&config().index_annotation).unwrap(), Some(1));
        on_node.push(c);

        // D: shared 1; GPU 1 locked, GPU 0 fills to exactly 8
        let mut d = shared_workload("d", "1");
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node.clone());
        assert_eq!(plugin.reserve(&mut d, &snapshot).await, Decision::Feasible);
        assert_eq!(d.gpu_index(&config().index_annotation).unwrap(), Some(0));
        on_node.push(d);

        // E: shared 1; GPU 0 full, GPU 1 locked
        let e = shared_workload("e", "1");
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node.clone());
        assert!(matches!(
            plugin.filter(&e, &snapshot).await,
            Decision::Unschedulable(_)
        ));
    }

    #[tokio::test]
    async fn test_reserve_then_unreserve_restores_model() {
        let plugin = plugin();
        let on_node = vec![placed(shared_workload("a", "5"), 0)];
        let snapshot = NodeSnapshot::new(node("2", "16"), on_node);

        let before = NodeModel::build(&snapshot.node, &snapshot.workloads, &[], &config()).unwrap();

        let mut workload = shared_workload("b", "2");
        assert_eq!(
            plugin.reserve(&mut workload, &snapshot).await,
            Decision::Feasible
        );
        plugin.unreserve(&mut workload).await;

        assert!(workload
            .gpu_index(&config().index_annotation)
            .unwrap()
            .is_none());
        let assumed = plugin.assume.for_node(&snapshot.node.name).await;
        let after =
            NodeModel::build(&snapshot.node, &snapshot.workloads, &assumed, &config()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_assumed_reservation_counts_before_store_catches_up() {
        let plugin = plugin();
        // one GPU, 8 bytes
        let snapshot = NodeSnapshot::new(node("1", "8"), vec![]);

        let mut a = shared_workload("a", "5");
        assert_eq!(plugin.reserve(&mut a, &snapshot).await, Decision::Feasible);

        // The store still shows an empty node, but the assumed 5 bytes must
        // count against a new 4-byte request.
        let b = shared_workload("b", "4");
        assert!(matches!(
            plugin.filter(&b, &snapshot).await,
            Decision::Unschedulable(_)
        ));

        // and a 3-byte request still fits
        let c = shared_workload("c", "3");
        assert_eq!(plugin.filter(&c, &snapshot).await, Decision::Feasible);
    }

    #[tokio::test]
    async fn test_reserve_without_fit_is_unschedulable() {
        let plugin = plugin();
        let snapshot = NodeSnapshot::new(
            node("1", "8"),
            vec![placed(exclusive_workload("a"), 0)],
        );
        let mut workload = shared_workload("b", "1");
        assert!(matches!(
            plugin.reserve(&mut workload, &snapshot).await,
            Decision::Unschedulable(_)
        ));
        assert!(workload
            .gpu_index(&config().index_annotation)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_score_prefers_packed_nodes() {
        let plugin = plugin();
        let workload = exclusive_workload("w");

        let idle = NodeSnapshot::new(node("2", "16"), vec![]);
        let busy = NodeSnapshot::new(
            node("2", "16"),
            vec![placed(shared_workload("a", "5"), 0)],
        );

        let (idle_score, _) = plugin.score(&workload, &idle).await;
        let (busy_score, _) = plugin.score(&workload, &busy).await;
        assert!(busy_score > idle_score);

        let shared = shared_workload("s", "1");
        let (idle_score, _) = plugin.score(&shared, &idle).await;
        let (busy_score, _) = plugin.score(&shared, &busy).await;
        assert!(busy_score > idle_score);
    }

    #[tokio::test]
    async fn test_score_without_intent_is_zero() {
        let plugin = plugin();
        let workload = Workload::new("plain");
        let snapshot = NodeSnapshot::new(node("2", "16"), vec![]);
        assert_eq!(plugin.score(&workload, &snapshot).await, (0, Decision::Feasible));
    }

    #[tokio::test]
    async fn test_bind_ships_annotations_and_drops_assumption() {
        let sink = Arc::new(RecordingSink::default());
        let plugin = FlexGpuPlugin::new(PluginConfig::default(), sink.clone());
        let snapshot = NodeSnapshot::new(node("2", "16"), vec![]);

        let mut workload = shared_workload("w", "5");
        assert_eq!(
            plugin.reserve(&mut workload, &snapshot).await,
            Decision::Feasible
        );
        assert_eq!(plugin.bind(&workload, "node-a").await, Decision::Feasible);

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].workload_uid, workload.uid);
        assert_eq!(requests[0].node_name, "node-a");
        assert_eq!(requests[0].annotations[&config().index_annotation], "0");
        drop(requests);

        assert!(plugin.assume.get(workload.uid).await.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_surfaces_error() {
        let plugin = FlexGpuPlugin::new(PluginConfig::default(), Arc::new(FailingSink));
        let workload = shared_workload("w", "5");
        assert!(matches!(
            plugin.bind(&workload, "node-a").await,
            Decision::Error(_)
        ));
    }
}
