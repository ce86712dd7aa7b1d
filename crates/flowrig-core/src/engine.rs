//! Engine facade: one plugin registry, one resolver, one executor.
//!
//! An `Engine` owns the process-scoped plugin state for a project. Separate
//! engines never share loaded plugins or download locks.

use std::sync::Arc;

use flowrig_types::config::GlobalConfig;
use flowrig_types::plugin::PluginManifest;
use flowrig_types::run::RunReport;
use flowrig_types::workflow::{ValueMap, Workflow};
use serde::Serialize;
use uuid::Uuid;

use crate::event::EventBus;
use crate::plugin::{
    ArtifactFetcher, Availability, PluginError, PluginHandle, PluginRegistry, PluginResolver,
    PluginStore, ResolvedFrom,
};
use crate::workflow::dag::{plan_workflow, validate_dag, ExecutionPlan};
use crate::workflow::definition::{resolve_variables, validate_definition, WorkflowError};
use crate::workflow::executor::{DagExecutor, ExecutorError, WorkflowExecutor};

/// A plugin referenced by a plan and how it would resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRequirement {
    pub name: String,
    pub availability: Availability,
}

/// `ExecutionPlan` plus plugin availability.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    #[serde(flatten)]
    pub plan: ExecutionPlan,
    pub plugins: Vec<PluginRequirement>,
}

impl PlanReport {
    /// Plugins that `apply` would have to download.
    pub fn pending_downloads(&self) -> impl Iterator<Item = &PluginRequirement> {
        self.plugins
            .iter()
            .filter(|p| p.availability == Availability::Download)
    }

    /// Plugins that cannot be resolved at all.
    pub fn missing(&self) -> impl Iterator<Item = &PluginRequirement> {
        self.plugins
            .iter()
            .filter(|p| p.availability == Availability::Missing)
    }
}

pub struct Engine<S, F> {
    config: GlobalConfig,
    resolver: Arc<PluginResolver<S, F>>,
    executor: DagExecutor<S, F>,
}

impl<S, F> Engine<S, F>
where
    S: PluginStore + 'static,
    F: ArtifactFetcher + 'static,
{
    pub fn new(config: GlobalConfig, store: S, fetcher: F, manifest: PluginManifest) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let resolver = Arc::new(PluginResolver::new(registry, store, fetcher, manifest));
        let executor = DagExecutor::new(Arc::clone(&resolver), &config, EventBus::default());
        Self {
            config,
            resolver,
            executor,
        }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        self.executor.events()
    }

    pub fn resolver(&self) -> &Arc<PluginResolver<S, F>> {
        &self.resolver
    }

    pub fn manifest(&self) -> &PluginManifest {
        self.resolver.manifest()
    }

    /// Make a plugin available without going through the store.
    pub fn register_plugin(&self, handle: PluginHandle) {
        self.resolver.registry().register(handle);
    }

    /// Structural and graph validation, no execution.
    pub fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        validate_definition(workflow)?;
        validate_dag(&workflow.steps)
    }

    /// Build the execution plan and report plugin availability.
    ///
    /// Variables are resolved so that a missing required variable fails the
    /// plan the same way it would fail `apply`.
    pub async fn plan(&self, workflow: &Workflow, variables: &ValueMap) -> Result<PlanReport, WorkflowError> {
        self.validate(workflow)?;
        resolve_variables(workflow, variables)?;
        let plan = plan_workflow(workflow)?;

        let mut plugins = Vec::new();
        for name in plan.plugins() {
            let availability = self.resolver.availability(name);
            plugins.push(PluginRequirement {
                name: name.to_string(),
                availability,
            });
        }
        Ok(PlanReport { plan, plugins })
    }

    /// Run `workflow` to completion.
    pub async fn apply(&self, workflow: &Workflow, variables: ValueMap) -> Result<RunReport, ExecutorError> {
        self.executor.execute(workflow, variables).await
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<(), ExecutorError> {
        self.executor.cancel(run_id).await
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        self.executor.active_runs()
    }

    /// Resolve a plugin ahead of any run, downloading it if needed.
    pub async fn install(&self, name: &str) -> Result<ResolvedFrom, PluginError> {
        self.resolver.resolve_traced(name).await.map(|(_, from)| from)
    }

    /// Availability of every plugin declared in the manifest.
    pub fn manifest_status(&self) -> Vec<PluginRequirement> {
        self.manifest()
            .plugins
            .iter()
            .map(|info| PluginRequirement {
                name: info.name.clone(),
                availability: self.resolver.availability(&info.name),
            })
            .collect()
    }
}
