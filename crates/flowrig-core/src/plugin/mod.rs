//! Plugin capability, registry, resolution, and manifest handling.
//!
//! - `capability` -- the `Plugin` trait, its object-safe twin, `PluginHandle`
//! - `catalog` -- parameter validation and defaults from an action catalog
//! - `registry` -- loaded handles for one engine, with per-name locks
//! - `resolver` -- registry, local store, then manifest download
//! - `manifest` -- manifest parsing and download URL construction

pub mod capability;
pub mod catalog;
pub mod manifest;
pub mod registry;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{Plugin, PluginDyn, PluginHandle};
pub use registry::PluginRegistry;
pub use resolver::{ArtifactFetcher, Availability, PluginResolver, PluginStore, ResolvedFrom};

use thiserror::Error;

/// Errors from resolving, validating, or running a plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' not found: not loaded, not installed, and not declared in the manifest")]
    NotFound(String),

    #[error("failed to download plugin '{name}' from {url}: {message}")]
    Download {
        name: String,
        url: String,
        message: String,
    },

    #[error("failed to extract plugin '{name}': {message}")]
    Extraction { name: String, message: String },

    #[error("checksum mismatch for plugin '{name}': expected {expected}, got {actual}")]
    Checksum {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("invalid plugin '{name}': {message}")]
    Invalid { name: String, message: String },

    #[error("plugin '{plugin}' has no action '{action}'")]
    UnknownAction { plugin: String, action: String },

    #[error("invalid parameters for {plugin}.{action}: {message}")]
    InvalidParams {
        plugin: String,
        action: String,
        message: String,
    },

    /// The plugin ran and reported a failure.
    #[error("{0}")]
    Execution(String),

    #[error("plugin '{plugin}' protocol error: {message}")]
    Protocol { plugin: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Whether the error arose while locating or installing the plugin.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Download { .. }
                | Self::Extraction { .. }
                | Self::Checksum { .. }
                | Self::Invalid { .. }
                | Self::Io(_)
        )
    }

    /// Whether the error rejected the request before execution.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownAction { .. } | Self::InvalidParams { .. })
    }
}
