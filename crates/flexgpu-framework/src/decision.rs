//! Per-phase decision codes returned to the host scheduler

use flexgpu_core::FlexError;

/// Outcome of one plugin phase for one candidate node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The node passes this phase
    Feasible,
    /// The node cannot host the workload now; other nodes may
    Unschedulable(String),
    /// The node can never host the workload; retrying is pointless
    UnschedulableAndUnresolvable(String),
    /// Infrastructure failure, surfaced for host-level retry policy
    Error(String),
}

impl Decision {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Decision::Feasible)
    }

    /// Map an engine error onto the decision taxonomy.
    ///
    /// Conflicting or unknown resource requests can never resolve on this
    /// node; capacity and fit shortfalls are retryable elsewhere; everything
    /// else is an infrastructure error.
    pub fn from_error(err: &FlexError) -> Decision {
        match err {
            FlexError::ConflictingRequest(..) | FlexError::UnknownResourceType(_) => {
                Decision::UnschedulableAndUnresolvable(err.to_string())
            }
            FlexError::CapacityExceeded(_) | FlexError::NoFitGpu => {
                Decision::Unschedulable(err.to_string())
            }
            _ => Decision::Error(err.to_string()),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Feasible => write!(f, "Feasible"),
            Decision::Unschedulable(reason) => write!(f, "Unschedulable: {}", reason),
            Decision::UnschedulableAndUnresolvable(reason) => {
                write!(f, "UnschedulableAndUnresolvable: {}", reason)
            }
            Decision::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}
