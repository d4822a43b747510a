//! Error types for the FlexGPU plugin

use thiserror::Error;

/// Main error type for FlexGPU scheduling operations
#[derive(Error, Debug)]
pub enum FlexError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A workload declared both the exclusive-GPU and the GPU-memory limit
    #[error("Conflicting resource limits: {0} and {1}")]
    ConflictingRequest(String, String),

    /// The node does not report a reserved resource name in its allocatable set
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    /// Aggregate commitment plus the new request exceeds the node total
    #[error("Insufficient resource: {0}")]
    CapacityExceeded(String),

    /// No individual GPU can satisfy the request despite aggregate capacity
    #[error("No GPU fits the request")]
    NoFitGpu,

    /// A reported quantity cannot be parsed as a whole-byte count
    #[error("Malformed quantity {value:?} for {resource}")]
    MalformedQuantity { resource: String, value: String },

    /// The external placement sink rejected the bind
    #[error("Bind rejected: {0}")]
    BindRejected(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlexError {
    /// Build a `MalformedQuantity` error for a resource/value pair.
    pub fn malformed(resource: &str, value: &str) -> Self {
        FlexError::MalformedQuantity {
            resource: resource.to_string(),
            value: value.to_string(),
        }
    }
}

/// Result type for FlexGPU operations
pub type FlexResult<T> = Result<T, FlexError>;

impl From<toml::de::Error> for FlexError {
    fn from(err: toml::de::Error) -> Self {
        FlexError::Config(err.to_string())
    }
}
