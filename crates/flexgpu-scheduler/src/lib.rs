//! flexgpu-scheduler: GPU-sharing scheduling engine
//!
//! This crate decides which GPU on a candidate node can satisfy a workload
//! requesting either an exclusive GPU or a slice of GPU memory:
//! - Resource intent classification
//! - Per-node capacity model and best-fit finding
//! - Assumed-allocation tracking across scheduling phases
//! - The plugin implementing the framework's filter/score/reserve/bind
//!   contracts

pub mod assume;
pub mod node_model;
pub mod plugin;
pub mod request;

pub use assume::{AssumeCache, AssumedAllocation};
pub use node_model::{GpuSlot, NodeModel};
pub use plugin::FlexGpuPlugin;
pub use request::GpuRequest;
