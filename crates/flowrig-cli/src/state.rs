//! Per-invocation application state: the loaded project and its engine.

use std::path::PathBuf;

use anyhow::Result;
use flowrig_infra::project::{Project, ProjectEngine};

pub struct AppState {
    pub project: Project,
    pub engine: ProjectEngine,
}

impl AppState {
    pub async fn init(project_dir: PathBuf, plugin_dir: Option<PathBuf>) -> Result<Self> {
        let project = Project::load(&project_dir, plugin_dir).await?;
        let engine = project.engine()?;
        tracing::debug!(
            project = %project.root.display(),
            plugin_dir = %project.plugin_dir.display(),
            "application state ready"
        );
        Ok(Self { project, engine })
    }
}
