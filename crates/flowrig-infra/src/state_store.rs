//! Run snapshot persistence at `.flowrig/state.json`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use flowrig_types::run::RunReport;
use flowrig_types::state::RunSnapshot;

use crate::config::FLOWRIG_DIR;

pub fn state_path(project_dir: &Path) -> PathBuf {
    project_dir.join(FLOWRIG_DIR).join("state.json")
}

/// Read the snapshot. A missing file is an empty snapshot.
pub async fn load_snapshot(project_dir: &Path) -> anyhow::Result<RunSnapshot> {
    let path = state_path(project_dir);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RunSnapshot::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Fold `report` into the snapshot and rewrite the file.
///
/// The file is written to a temporary sibling and renamed into place.
pub async fn record_run(project_dir: &Path, report: &RunReport) -> anyhow::Result<RunSnapshot> {
    let mut snapshot = match load_snapshot(project_dir).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "discarding unreadable run snapshot");
            RunSnapshot::default()
        }
    };
    snapshot.record(report);

    let path = state_path(project_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(&snapshot).context("failed to serialize run snapshot")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;

    tracing::debug!(flow = %report.flow, path = %path.display(), "run snapshot updated");
    Ok(snapshot)
}
