//! Workload resource intent classification

use flexgpu_core::{FlexError, FlexResult, PluginConfig, Quantity, Workload};
use tracing::warn;

/// A workload's GPU resource intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuRequest {
    /// No GPU limit declared; the plugin has no opinion on this workload
    None,
    /// Exclusive use of whole GPUs
    Exclusive(i64),
    /// A fractional slice of one GPU's memory
    Shared(Quantity),
}

/// Sum one named resource limit across all containers of a workload.
///
/// Returns `None` when no container declares the limit at all; a declared
/// but unparseable value is an error.
pub fn limit_sum(workload: &Workload, resource: &str) -> FlexResult<Option<Quantity>> {
    let mut declared = false;
    let mut sum = Quantity::ZERO;
    for container in &workload.containers {
        if let Some(raw) = container.limits.get(resource) {
            declared = true;
            sum += Quantity::parse(resource, raw)?;
        }
    }
    Ok(declared.then_some(sum))
}

/// Sum one named resource limit across a set of placed workloads.
///
/// Placed records are outside this plugin's control; one with a malformed
/// limit is logged and left out of the sum rather than failing the node.
pub fn workloads_limit_sum(workloads: &[Workload], resource: &str) -> Quantity {
    let mut sum = Quantity::ZERO;
    for workload in workloads {
        match limit_sum(workload, resource) {
            Ok(Some(limit)) => sum += limit,
            Ok(None) => {}
            Err(err) => {
                warn!(workload = %workload.name, error = %err, "skipping malformed limit");
            }
        }
    }
    sum
}

/// Classify a workload's GPU intent.
///
/// Declaring both reserved resource names is a conflict, always rejected,
/// never resolved by preference. An exclusive count other than 1 is logged
/// as invalid input but still classified; the fit finder claims exactly one
/// GPU per exclusive workload.
pub fn classify(workload: &Workload, config: &PluginConfig) -> FlexResult<GpuRequest> {
    let gpu_limit = limit_sum(workload, &config.gpu_resource)?;
    let mem_limit = limit_sum(workload, &config.memory_resource)?;

    match (gpu_limit, mem_limit) {
        (None, None) => Ok(GpuRequest::None),
        (Some(_), Some(_)) => {
            warn!(
                workload = %workload.name,
                "workload declares conflicting resources {} and {}",
                config.gpu_resource,
                config.memory_resource
            );
            Err(FlexError::ConflictingRequest(
                config.gpu_resource.clone(),
                config.memory_resource.clone(),
            ))
        }
        (Some(count), None) => {
            if count.as_bytes() != 1 {
                warn!(
                    workload = %workload.name,
                    limit = %count,
                    "invalid {} limit, expected 1",
                    config.gpu_resource
                );
            }
            Ok(GpuRequest::Exclusive(count.as_bytes()))
        }
        (None, Some(bytes)) => Ok(GpuRequest::Shared(bytes)),
    }
}
