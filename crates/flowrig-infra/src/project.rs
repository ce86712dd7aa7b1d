//! Project loading: config, flows, and the plugin manifest.
//!
//! A project directory looks like:
//! ```text
//! {root}/
//!   flows/*.yaml          flow documents
//!   plugins.yaml          plugin manifest (optional)
//!   .flowrig/config.toml  global config (optional)
//!   .flowrig/plugins/     installed plugins
//!   .flowrig/state.json   run snapshot
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use flowrig_core::engine::Engine;
use flowrig_core::plugin::manifest::parse_manifest;
use flowrig_core::workflow::definition::{discover_workflows, validate_chains};
use flowrig_types::config::GlobalConfig;
use flowrig_types::plugin::PluginManifest;
use flowrig_types::workflow::Workflow;

use crate::config::{load_global_config, resolve_plugin_dir};
use crate::plugin::builtin::builtin_plugins;
use crate::plugin::{HttpFetcher, LocalPluginStore};

/// Directory under the project root holding flow documents.
pub const FLOWS_DIR: &str = "flows";

/// Engine wired to the local plugin directory and HTTP downloads.
pub type ProjectEngine = Engine<LocalPluginStore, HttpFetcher>;

#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: GlobalConfig,
    pub plugin_dir: PathBuf,
    /// Flows sorted by file path.
    pub flows: Vec<(PathBuf, Workflow)>,
    pub manifest: PluginManifest,
    /// Where the manifest was read from, if anywhere.
    pub manifest_path: Option<PathBuf>,
}

impl Project {
    /// Load everything under `root`. `plugin_dir` overrides the configured
    /// plugin directory.
    pub async fn load(root: &Path, plugin_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        if !root.is_dir() {
            bail!("project directory {} does not exist", root.display());
        }
        let config = load_global_config(root).await;
        let plugin_dir = plugin_dir.unwrap_or_else(|| resolve_plugin_dir(root, &config.plugins.dir));

        let flows_dir = root.join(FLOWS_DIR);
        let flows = discover_workflows(&flows_dir)
            .with_context(|| format!("failed to load flows from {}", flows_dir.display()))?;
        let workflows: Vec<Workflow> = flows.iter().map(|(_, wf)| wf.clone()).collect();
        validate_chains(&workflows).context("invalid flow chain")?;

        let (manifest, manifest_path) = load_manifest(root, &plugin_dir, &config.plugins.manifest)?;

        tracing::debug!(
            root = %root.display(),
            flows = flows.len(),
            manifest_plugins = manifest.plugins.len(),
            "project loaded"
        );
        Ok(Self {
            root: root.to_path_buf(),
            config,
            plugin_dir,
            flows,
            manifest,
            manifest_path,
        })
    }

    pub fn flow(&self, name: &str) -> Option<&Workflow> {
        self.flows.iter().map(|(_, wf)| wf).find(|wf| wf.name == name)
    }

    /// One named flow, or every flow sorted by name.
    pub fn select(&self, name: Option<&str>) -> anyhow::Result<Vec<&Workflow>> {
        match name {
            Some(name) => match self.flow(name) {
                Some(wf) => Ok(vec![wf]),
                None => {
                    let known: Vec<&str> = self.flows.iter().map(|(_, wf)| wf.name.as_str()).collect();
                    bail!("flow '{name}' not found (known flows: {})", known.join(", "))
                }
            },
            None => {
                let mut all: Vec<&Workflow> = self.flows.iter().map(|(_, wf)| wf).collect();
                all.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(all)
            }
        }
    }

    /// Build an engine with the built-in plugins registered.
    pub fn engine(&self) -> anyhow::Result<ProjectEngine> {
        let fetcher = HttpFetcher::new(
            &self.config.plugins.user_agent,
            Duration::from_secs(self.config.plugins.download_timeout_secs),
        )
        .context("invalid [plugins] configuration")?;
        let engine = Engine::new(
            self.config.clone(),
            LocalPluginStore::new(&self.plugin_dir),
            fetcher,
            self.manifest.clone(),
        );
        for handle in builtin_plugins(&self.root) {
            engine.register_plugin(handle);
        }
        Ok(engine)
    }
}

/// Read the plugin manifest: `{root}/{file}`, then `{plugin_dir}/{file}`.
///
/// No manifest at either location is an empty manifest.
pub fn load_manifest(
    root: &Path,
    plugin_dir: &Path,
    file_name: &str,
) -> anyhow::Result<(PluginManifest, Option<PathBuf>)> {
    for candidate in [root.join(file_name), plugin_dir.join(file_name)] {
        if !candidate.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read {}", candidate.display()))?;
        let manifest = parse_manifest(&content)
            .with_context(|| format!("invalid plugin manifest {}", candidate.display()))?;
        return Ok((manifest, Some(candidate)));
    }
    Ok((PluginManifest::default(), None))
}
