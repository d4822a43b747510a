//! Per-node GPU capacity model
//!
//! The model is never persisted. It is rebuilt from scratch on every
//! feasibility check and every reservation, from the node's declared
//! capacity plus the workloads currently placed on it, and lives no longer
//! than the call that built it.

use std::collections::HashSet;

use flexgpu_core::{FlexError, FlexResult, Node, PluginConfig, Quantity, Workload};
use tracing::{debug, warn};

use crate::assume::AssumedAllocation;
use crate::request::{limit_sum, GpuRequest};

/// One physical GPU slot on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSlot {
    /// Slot index
    pub index: usize,
    /// Claimed whole by one exclusive workload
    pub exclusive: bool,
    /// Memory capacity of this slot
    pub capacity: Quantity,
    /// Memory committed by shared workloads
    pub used: Quantity,
}

/// The rebuilt capacity model of one node.
///
/// Every GPU on a node is assumed to have the same memory capacity:
/// `memory_total / gpu_count`, truncating. The division remainder stays
/// unaccounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeModel {
    /// Declared GPU count
    pub gpu_count: i64,
    /// Declared total GPU memory
    pub memory_total: Quantity,
    /// Per-slot state, indexed 0..gpu_count
    pub slots: Vec<GpuSlot>,
}

impl NodeModel {
    /// Build the model from the node's declared capacity, the workloads
    /// placed on it, and reservations assumed on it but not yet visible in
    /// the store.
    pub fn build(
        node: &Node,
        workloads: &[Workload],
        assumed: &[AssumedAllocation],
        config: &PluginConfig,
    ) -> FlexResult<NodeModel> {
        let gpu_raw = node
            .allocatable_raw(&config.gpu_resource)
            .ok_or_else(|| FlexError::UnknownResourceType(config.gpu_resource.clone()))?;
        let mem_raw = node
            .allocatable_raw(&config.memory_resource)
            .ok_or_else(|| FlexError::UnknownResourceType(config.memory_resource.clone()))?;

        let gpu_count = Quantity::parse(&config.gpu_resource, gpu_raw)?.as_bytes();
        if gpu_count <= 0 {
            return Err(FlexError::malformed(&config.gpu_resource, gpu_raw));
        }
        let memory_total = Quantity::parse(&config.memory_resource, mem_raw)?;

        let capacity = memory_total.div_floor(gpu_count);
        debug!(
            node = %node.name,
            gpus = gpu_count,
            memory = %memory_total,
            per_gpu = %capacity,
            "building node model"
        );

        let mut slots: Vec<GpuSlot> = (0..gpu_count as usize)
            .map(|index| GpuSlot {
                index,
                exclusive: false,
                capacity,
                used: Quantity::ZERO,
            })
            .collect();

        let mut seen = HashSet::new();
        for workload in workloads {
            seen.insert(workload.uid);
            replay_workload(&mut slots, workload, assumed, config);
        }

        // Reservations for workloads the store does not list yet.
        for allocation in assumed {
            if seen.contains(&allocation.workload_uid) {
                continue;
            }
            apply(
                &mut slots,
                allocation.gpu_index,
                allocation.request,
                &allocation.workload_uid.to_string(),
            );
        }

        Ok(NodeModel {
            gpu_count,
            memory_total,
            slots,
        })
    }

    /// GPU indexes that could take a shared-memory request, best fit first.
    ///
    /// A slot qualifies if it is not exclusively claimed and the request
    /// still fits its capacity. Candidates are ordered ascending by the
    /// headroom left after hypothetically accepting the request, ties broken
    /// by ascending index, so identical inputs always place identically.
    pub fn shared_fit_indexes(&self, request: Quantity) -> Vec<usize> {
        let mut fits: Vec<(Quantity, usize)> = Vec::new();
        for slot in &self.slots {
            warn_if_inconsistent(slot);

            let assumed = slot.used + request;
            if !slot.exclusive && assumed <= slot.capacity {
                debug!(index = slot.index, "possible fit");
                fits.push((slot.capacity - assumed, slot.index));
            }
        }

        // Bin-pack affinity: tightest remaining headroom first.
        fits.sort();
        fits.into_iter().map(|(_, index)| index).collect()
    }

    /// GPU indexes free for an exclusive claim, ascending.
    ///
    /// Any nonzero shared usage disqualifies a slot; an exclusive workload
    /// takes the whole GPU.
    pub fn exclusive_fit_indexes(&self) -> Vec<usize> {
        let mut fits = Vec::new();
        for slot in &self.slots {
            warn_if_inconsistent(slot);

            if !slot.exclusive && slot.used.is_zero() {
                debug!(index = slot.index, "possible fit");
                fits.push(slot.index);
            }
        }
        fits
    }

    /// Count of fully idle GPUs (neither claimed nor carrying shared usage).
    pub fn idle_gpu_count(&self) -> i64 {
        self.slots
            .iter()
            .filter(|s| !s.exclusive && s.used.is_zero())
            .count() as i64
    }

    /// Aggregate unused slot capacity across the node.
    pub fn free_memory(&self) -> Quantity {
        self.slots.iter().map(|s| s.capacity - s.used).sum()
    }
}

fn warn_if_inconsistent(slot: &GpuSlot) {
    if slot.exclusive && !slot.used.is_zero() {
        warn!(
            index = slot.index,
            used = %slot.used,
            "GPU is exclusively claimed and carries shared usage"
        );
    }
}

/// Replay one placed workload into the slot table.
///
/// A workload that declares neither resource is skipped. One that declares a
/// resource but has no resolvable index is an anomaly: it was never
/// committed, and guessing an index would corrupt the model, so it is logged
/// and skipped.
fn replay_workload(
    slots: &mut [GpuSlot],
    workload: &Workload,
    assumed: &[AssumedAllocation],
    config: &PluginConfig,
) {
    let gpu_limit = match limit_sum(workload, &config.gpu_resource) {
        Ok(limit) => limit,
        Err(err) => {
            warn!(workload = %workload.name, error = %err, "skipping workload with malformed limit");
            return;
        }
    };
    let mem_limit = match limit_sum(workload, &config.memory_resource) {
        Ok(limit) => limit,
        Err(err) => {
            warn!(workload = %workload.name, error = %err, "skipping workload with malformed limit");
            return;
        }
    };

    if gpu_limit.is_none() && mem_limit.is_none() {
        debug!(workload = %workload.name, "skip, no GPU limits");
        return;
    }

    if let Some(count) = gpu_limit {
        if count.as_bytes() != 1 {
            warn!(
                workload = %workload.name,
                limit = %count,
                "invalid {} limit, expected 1",
                config.gpu_resource
            );
        }
    }

    let index = match workload.gpu_index(&config.index_annotation) {
        Ok(Some(index)) => index,
        Ok(None) => {
            // Not yet persisted; the reservation may still be assumed here.
            match assumed.iter().find(|a| a.workload_uid == workload.uid) {
                Some(allocation) => allocation.gpu_index,
                None => {
                    warn!(
                        workload = %workload.name,
                        "workload declares GPU limits but has no index annotation"
                    );
                    return;
                }
            }
        }
        Err(err) => {
            warn!(workload = %workload.name, error = %err, "invalid index annotation");
            return;
        }
    };

    if gpu_limit.is_some() {
        apply(slots, index, GpuRequest::Exclusive(1), &workload.name);
    }
    if let Some(bytes) = mem_limit {
        apply(slots, index, GpuRequest::Shared(bytes), &workload.name);
    }
}

fn apply(slots: &mut [GpuSlot], index: usize, request: GpuRequest, who: &str) {
    let Some(slot) = slots.get_mut(index) else {
        warn!(workload = %who, index, "index annotation out of range");
        return;
    };
    match request {
        GpuRequest::Exclusive(_) => {
            debug!(workload = %who, index, "set exclusive");
            slot.exclusive = true;
        }
        GpuRequest::Shared(bytes) => {
            debug!(workload = %who, index, bytes = %bytes, "add shared usage");
            slot.used += bytes;
        }
        GpuRequest::None => {}
    }
}
