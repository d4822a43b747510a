//! Workload and node records as reported by the cluster store
//!
//! These records are owned by the external store; the plugin reads them for
//! the duration of a single call and copies out what it keeps. Quantity
//! values stay in their reported string form and are parsed where they are
//! used, so a malformed value surfaces from the operation that read it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlexError, FlexResult};

/// One container of a workload, with its resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Container name
    pub name: String,
    /// Resource limits, keyed by resource name, values in quantity format
    #[serde(default)]
    pub limits: HashMap<String, String>,
}

impl Container {
    /// Create a container with a single resource limit.
    pub fn with_limit(name: impl Into<String>, resource: &str, value: &str) -> Self {
        let mut limits = HashMap::new();
        limits.insert(resource.to_string(), value.to_string());
        Self {
            name: name.into(),
            limits,
        }
    }
}

/// A workload record: containers plus scheduling metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    /// Unique workload identifier
    pub uid: Uuid,
    /// Human-readable name
    pub name: String,
    /// Containers and their resource limits
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Metadata annotations, including the committed GPU index
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Workload {
    /// Create a workload with no containers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            containers: Vec::new(),
            annotations: HashMap::new(),
        }
    }

    /// Read the committed GPU index annotation, if present and well-formed.
    ///
    /// The value is a base-10 non-negative integer. A present but
    /// unparseable value returns an error so callers can report it.
    pub fn gpu_index(&self, annotation_key: &str) -> FlexResult<Option<usize>> {
        match self.annotations.get(annotation_key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<usize>()
                .map(Some)
                .map_err(|_| FlexError::malformed(annotation_key, raw)),
        }
    }

    /// Write the committed GPU index annotation.
    pub fn set_gpu_index(&mut self, annotation_key: &str, index: usize) {
        self.annotations
            .insert(annotation_key.to_string(), index.to_string());
    }

    /// Remove the committed GPU index annotation, if any.
    pub fn clear_gpu_index(&mut self, annotation_key: &str) {
        self.annotations.remove(annotation_key);
    }
}

/// A node record: declared allocatable capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Allocatable quantities, keyed by resource name
    #[serde(default)]
    pub allocatable: HashMap<String, String>,
}

impl Node {
    /// Create a node with no allocatable resources.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocatable: HashMap::new(),
        }
    }

    /// Whether the node reports the given resource name at all.
    pub fn reports(&self, resource: &str) -> bool {
        self.allocatable.contains_key(resource)
    }

    /// Raw allocatable value for a resource name.
    pub fn allocatable_raw(&self, resource: &str) -> Option<&str> {
        self.allocatable.get(resource).map(String::as_str)
    }
}
