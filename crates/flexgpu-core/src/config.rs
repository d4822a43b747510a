//! Plugin configuration

use serde::{Deserialize, Serialize};

/// Resource names and metadata keys the plugin operates on.
///
/// The two reserved resource names select exclusive-GPU and GPU-memory
/// limits in workload and node records; the annotation key is where the
/// committed GPU index is written. Supplied at plugin construction instead
/// of hard-coded constants so deployments can rename the device-plugin
/// resources without rebuilding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Resource name for exclusive GPU count limits
    #[serde(default = "default_gpu_resource")]
    pub gpu_resource: String,
    /// Resource name for fractional GPU memory limits
    #[serde(default = "default_memory_resource")]
    pub memory_resource: String,
    /// Annotation key holding the committed GPU index (base-10)
    #[serde(default = "default_index_annotation")]
    pub index_annotation: String,
}

fn default_gpu_resource() -> String {
    "nvidia.flex.com/gpu".to_string()
}

fn default_memory_resource() -> String {
    "nvidia.flex.com/memory".to_string()
}

fn default_index_annotation() -> String {
    "nvidia.flex.com/index".to_string()
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            gpu_resource: default_gpu_resource(),
            memory_resource: default_memory_resource(),
            index_annotation: default_index_annotation(),
        }
    }
}

impl PluginConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::FlexError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::FlexError::Config(format!("Failed to read config file: {}", e))
        })?;
        Ok(toml::from_str(&content)?)
    }
}
