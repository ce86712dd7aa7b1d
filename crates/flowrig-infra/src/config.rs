//! Global configuration loader for flowrig.
//!
//! Reads `.flowrig/config.toml` from the project directory and deserializes
//! it into [`GlobalConfig`]. Falls back to defaults when the file is missing
//! or malformed.

use std::path::{Path, PathBuf};

use flowrig_types::config::GlobalConfig;

/// Project-relative directory holding config, state, and plugins.
pub const FLOWRIG_DIR: &str = ".flowrig";

pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(FLOWRIG_DIR).join("config.toml")
}

/// Load global configuration from `{project_dir}/.flowrig/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_global_config(project_dir: &Path) -> GlobalConfig {
    let path = config_path(project_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// Resolve the configured plugin directory against the project directory.
///
/// A leading `~/` expands to the home directory.
pub fn resolve_plugin_dir(project_dir: &Path, configured: &str) -> PathBuf {
    if let Some(rest) = configured.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}
