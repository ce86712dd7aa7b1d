//! `flowrig plan`.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color};
use console::style;
use flowrig_core::engine::PlanReport;
use flowrig_core::plugin::Availability;
use flowrig_types::workflow::ValueMap;

use super::output::{duration_ms, table};
use crate::state::AppState;

pub async fn plan(state: &AppState, flow: Option<&str>, vars: &ValueMap, json: bool) -> Result<()> {
    let flows = state.project.select(flow)?;

    let mut reports = Vec::with_capacity(flows.len());
    for wf in flows {
        let report = state
            .engine
            .plan(wf, vars)
            .await
            .with_context(|| format!("cannot plan flow '{}'", wf.name))?;
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for report in &reports {
        print_plan(report);
    }
    Ok(())
}

fn print_plan(report: &PlanReport) {
    let plan = &report.plan;
    println!();
    println!(
        "  {} Plan for '{}': {} steps in {} layers, estimated {}",
        style("▸").cyan().bold(),
        style(&plan.flow).cyan(),
        plan.step_count(),
        plan.layers.len(),
        duration_ms(plan.estimated_secs * 1_000)
    );

    let mut steps = table(&["Step", "Layer", "Plugin", "Action", "Depends on", "Notes"]);
    for (i, layer) in plan.layers.iter().enumerate() {
        for step in layer {
            let mut notes = Vec::new();
            if let Some(cond) = &step.condition {
                notes.push(format!("if {cond}"));
            }
            if let Some(over) = &step.loop_over {
                notes.push(format!("loop over {over}"));
            }
            if step.continue_on_error {
                notes.push("continue on error".to_string());
            }
            steps.add_row(vec![
                Cell::new(&step.name),
                Cell::new(i + 1),
                Cell::new(&step.plugin),
                Cell::new(&step.action),
                Cell::new(step.depends_on.join(", ")),
                Cell::new(notes.join("; ")),
            ]);
        }
    }
    println!("{steps}");

    let mut plugins = table(&["Plugin", "Availability"]);
    for req in &report.plugins {
        let color = match req.availability {
            Availability::Loaded | Availability::Installed => Color::Green,
            Availability::Download => Color::Yellow,
            Availability::Missing => Color::Red,
        };
        plugins.add_row(vec![
            Cell::new(&req.name),
            Cell::new(req.availability.as_str()).fg(color),
        ]);
    }
    println!("{plugins}");

    let downloads = report.pending_downloads().count();
    if downloads > 0 {
        println!("  {downloads} plugin(s) will be downloaded on apply.");
    }
    for missing in report.missing() {
        println!(
            "  {} plugin '{}' is not installed and not in the manifest",
            style("!").red().bold(),
            missing.name
        );
    }
    println!();
}
