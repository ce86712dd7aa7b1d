//! Plugin manifest and capability catalog types.
//!
//! The manifest (`plugins.yaml`) declares externally distributed plugins and
//! where to fetch them. The catalog types describe what a plugin offers and
//! are used for parameter validation and documentation, never for dispatch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The `plugins.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

impl PluginManifest {
    /// Find a plugin entry by name.
    pub fn find(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

/// One distributable plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    /// Base repository URL.
    pub repository: String,
    /// Release version, e.g. `v1.2.0`.
    pub version: String,
    /// Executable path relative to the plugin's install directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Expected SHA-256 hex digest of the downloaded archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

// ---------------------------------------------------------------------------
// Capability catalog
// ---------------------------------------------------------------------------

/// Descriptive metadata a plugin reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// One action a plugin can execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSpec>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Builder-style helper for declaring an input.
    pub fn input(mut self, name: &str, input_type: &str, required: bool, description: &str) -> Self {
        self.inputs.insert(
            name.to_string(),
            InputSpec {
                input_type: input_type.to_string(),
                description: description.to_string(),
                required,
                default: None,
            },
        );
        self
    }

    /// Builder-style helper for declaring an optional input with a default.
    pub fn input_with_default(mut self, name: &str, input_type: &str, default: Value, description: &str) -> Self {
        self.inputs.insert(
            name.to_string(),
            InputSpec {
                input_type: input_type.to_string(),
                description: description.to_string(),
                required: false,
                default: Some(default),
            },
        );
        self
    }

    /// Builder-style helper for declaring an output.
    pub fn output(mut self, name: &str, output_type: &str, description: &str) -> Self {
        self.outputs.insert(
            name.to_string(),
            OutputSpec {
                output_type: output_type.to_string(),
                description: description.to_string(),
            },
        );
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub output_type: String,
    #[serde(default)]
    pub description: String,
}
