//! `flowrig status`: last recorded outcome of each flow.

use anyhow::Result;
use comfy_table::Cell;
use console::style;
use flowrig_infra::state_store::{load_snapshot, state_path};
use flowrig_types::run::StepStatus;

use super::output::{duration_ms, run_status, table};
use crate::state::AppState;

pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let snapshot = load_snapshot(&state.project.root).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} flowrig v{} in {}",
        style("▸").cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        style(state.project.root.display()).dim()
    );
    println!(
        "  {} flows defined, {} recorded",
        state.project.flows.len(),
        snapshot.flows.len()
    );
    if let Some(at) = snapshot.last_apply {
        println!("  Last apply: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if snapshot.flows.is_empty() {
        println!();
        println!("  No runs recorded yet. Use 'flowrig apply' to run a flow.");
        println!();
        return Ok(());
    }

    let mut t = table(&["Flow", "Status", "Steps", "Failed", "Finished", "Duration"]);
    for (name, flow) in &snapshot.flows {
        let failed = flow
            .steps
            .values()
            .filter(|s| **s == StepStatus::Failed)
            .count();
        t.add_row(vec![
            Cell::new(name),
            Cell::new(run_status(flow.status)),
            Cell::new(flow.steps.len()),
            Cell::new(failed),
            Cell::new(flow.finished_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(duration_ms(flow.duration_ms)),
        ]);
    }
    println!("{t}");
    println!("  {}", style(state_path(&state.project.root).display()).dim());
    println!();
    Ok(())
}
