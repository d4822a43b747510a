//! flexgpu-framework: Scheduling framework contracts
//!
//! This crate defines the surface between the host scheduler and the
//! FlexGPU plugin:
//! - Per-phase decision codes
//! - The immutable node snapshot handed to each phase
//! - Filter/score/reserve/bind capability traits
//! - The external placement sink used by bind

pub mod decision;
pub mod snapshot;
pub mod traits;

pub use decision::Decision;
pub use snapshot::NodeSnapshot;
pub use traits::{BindPlugin, BindRequest, FilterPlugin, PlacementSink, ReservePlugin, ScorePlugin};
