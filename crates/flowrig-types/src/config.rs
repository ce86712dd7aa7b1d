//! Global configuration types for flowrig.
//!
//! `GlobalConfig` represents the project-level `.flowrig/config.toml` that
//! controls timeout bounds, retry defaults, and plugin storage.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a flowrig project.
///
/// Loaded from `<project>/.flowrig/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryDefaults,

    #[serde(default)]
    pub plugins: PluginConfig,

    /// Cap on concurrently running step instances (None = one task per ready instance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

/// Bounds applied by the timeout controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Used when a step declares no timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_secs: u64,
    /// Step timeouts above this are clamped.
    #[serde(default = "max_timeout_secs")]
    pub max_secs: u64,
    /// Optional deadline for a whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_secs: Option<u64>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn max_timeout_secs() -> u64 {
    300
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: default_timeout_secs(),
            max_secs: max_timeout_secs(),
            run_secs: None,
        }
    }
}

/// Retry settings used when a step's `retry` block omits a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Substrings that mark an error message as transient.
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_retryable_errors() -> Vec<String> {
    ["timeout", "connection", "network", "temporary"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// Plugin storage and download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Local plugin storage, relative to the project directory unless absolute.
    #[serde(default = "default_plugin_dir")]
    pub dir: String,
    /// Manifest file name looked up in the project and plugin directories.
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_plugin_dir() -> String {
    ".flowrig/plugins".to_string()
}

fn default_manifest() -> String {
    "plugins.yaml".to_string()
}

fn default_user_agent() -> String {
    concat!("flowrig/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_download_timeout_secs() -> u64 {
    120
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dir: default_plugin_dir(),
            manifest: default_manifest(),
            user_agent: default_user_agent(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}
