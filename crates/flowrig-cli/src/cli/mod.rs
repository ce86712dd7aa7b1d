//! CLI command definitions for the `flowrig` binary.
//!
//! Uses clap derive macros for argument parsing. Every command operates on a
//! project directory (`--project`, default the current directory).

pub mod apply;
pub mod output;
pub mod plan;
pub mod plugin;
pub mod status;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use flowrig_types::workflow::ValueMap;
use serde_json::Value;

/// Declarative workflow orchestration.
#[derive(Parser)]
#[command(name = "flowrig", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory containing `flows/` and `.flowrig/`.
    #[arg(long, global = true, env = "FLOWRIG_PROJECT", default_value = ".")]
    pub project: PathBuf,

    /// Override the plugin directory from config.
    #[arg(long, global = true, env = "FLOWRIG_PLUGIN_DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "FLOWRIG_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate flow documents and their step graphs.
    Validate {
        /// Flow name (omit for all flows).
        flow: Option<String>,
    },

    /// Show what `apply` would run, without running anything.
    Plan {
        /// Flow name (omit for all flows).
        flow: Option<String>,

        /// Variable override, `key=value` (value parsed as JSON when possible).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },

    /// Run flows.
    Apply {
        /// Flow name (omit to run every flow in name order).
        flow: Option<String>,

        /// Variable override, `key=value` (value parsed as JSON when possible).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Manage manifest plugins.
    Plugin {
        #[command(subcommand)]
        action: plugin::PluginCommand,
    },

    /// Show the last recorded outcome of each flow.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse `key=value`. The value is JSON when it parses as JSON, else a string.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn vars_to_map(vars: Vec<(String, Value)>) -> ValueMap {
    vars.into_iter().collect()
}
