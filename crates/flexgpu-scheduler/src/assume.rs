//! Assumed-allocation cache
//!
//! The capacity model is rebuilt by rescanning placed workloads, so a
//! reservation is invisible to other scheduling cycles until the external
//! store persists the workload's annotation. This cache holds reservations
//! made by this plugin instance in the meantime; the feasibility and reserve
//! paths consult it so that in-flight reservations still count.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::request::GpuRequest;

/// A reservation not yet visible in the external store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumedAllocation {
    /// The reserved workload
    pub workload_uid: Uuid,
    /// Node the workload was reserved on
    pub node_name: String,
    /// Committed GPU index
    pub gpu_index: usize,
    /// The classified request, replayed into rebuilt models
    pub request: GpuRequest,
}

/// Reservations keyed by workload uid, updated atomically on
/// reserve/unreserve/bind.
#[derive(Default)]
pub struct AssumeCache {
    inner: RwLock<HashMap<Uuid, AssumedAllocation>>,
}

impl AssumeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reservation.
    pub async fn assume(&self, allocation: AssumedAllocation) {
        debug!(
            workload = %allocation.workload_uid,
            node = %allocation.node_name,
            gpu = allocation.gpu_index,
            "assumed allocation"
        );
        self.inner
            .write()
            .await
            .insert(allocation.workload_uid, allocation);
    }

    /// Drop a reservation, if present.
    pub async fn forget(&self, workload_uid: Uuid) -> Option<AssumedAllocation> {
        let removed = self.inner.write().await.remove(&workload_uid);
        if removed.is_some() {
            debug!(workload = %workload_uid, "forgot assumed allocation");
        }
        removed
    }

    pub async fn get(&self, workload_uid: Uuid) -> Option<AssumedAllocation> {
        self.inner.read().await.get(&workload_uid).cloned()
    }

    /// All reservations currently assumed on a node.
    pub async fn for_node(&self, node_name: &str) -> Vec<AssumedAllocation> {
        self.inner
            .read()
            .await
            .values()
            .filter(|a| a.node_name == node_name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexgpu_core::Quantity;

    fn allocation(node: &str, index: usize) -> AssumedAllocation {
        AssumedAllocation {
            workload_uid: Uuid::new_v4(),
            node_name: node.to_string(),
            gpu_index: index,
            request: GpuRequest::Shared(Quantity::from_bytes(1024)),
        }
    }

    #[tokio::test]
    async fn test_assume_and_forget() {
        let cache = AssumeCache::new();
        let alloc = allocation("node-a", 0);
        let uid = alloc.workload_uid;

        cache.assume(alloc.clone()).await;
        assert_eq!(cache.get(uid).await, Some(alloc));

        assert!(cache.forget(uid).await.is_some());
        assert_eq!(cache.get(uid).await, None);
        // forget is idempotent
        assert!(cache.forget(uid).await.is_none());
    }

    #[tokio::test]
    async fn test_for_node_filters() {
        let cache = AssumeCache::new();
        cache.assume(allocation("node-a", 0)).await;
        cache.assume(allocation("node-a", 1)).await;
        cache.assume(allocation("node-b", 0)).await;

        assert_eq!(cache.for_node("node-a").await.len(), 2);
        assert_eq!(cache.for_node("node-b").await.len(), 1);
        assert!(cache.for_node("node-c").await.is_empty());
    }
}
