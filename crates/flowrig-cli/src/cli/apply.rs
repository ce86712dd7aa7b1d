//! `flowrig apply`: run flows with live progress.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use comfy_table::Cell;
use console::style;
use dialoguer::Confirm;
use flowrig_infra::state_store::record_run;
use flowrig_types::event::RunEvent;
use flowrig_types::run::{RunReport, RunStatus};
use flowrig_types::workflow::{ValueMap, Workflow};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::output::{duration_ms, run_status, short_error, step_marker, step_status_cell, table};
use crate::state::AppState;

pub struct ApplyOptions {
    pub yes: bool,
    pub json: bool,
    pub quiet: bool,
}

/// Run one flow or every flow in name order. Each finished run is recorded
/// in the snapshot. Fails when any run did not succeed.
pub async fn apply(state: &AppState, flow: Option<&str>, vars: ValueMap, opts: &ApplyOptions) -> Result<()> {
    let flows = state.project.select(flow)?;
    for wf in &flows {
        state.engine.validate(wf)?;
    }

    if !opts.yes && !opts.json && console::user_attended() {
        let names: Vec<&str> = flows.iter().map(|w| w.name.as_str()).collect();
        let confirmed = Confirm::new()
            .with_prompt(format!("Apply {}?", style(names.join(", ")).cyan()))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let interrupted = AtomicBool::new(false);
    let vars = &vars;
    let interrupted_ref = &interrupted;
    let reports = run_in_order(&flows, &interrupted, |wf| async move {
        let report = run_one(state, wf, vars.clone(), opts, interrupted_ref).await?;
        if let Err(err) = record_run(&state.project.root, &report).await {
            tracing::warn!(flow = %report.flow, error = %format!("{err:#}"), "failed to update run snapshot");
        }
        if !opts.json && !opts.quiet {
            print_report(&report);
        }
        Ok(report)
    })
    .await?;
    if interrupted.load(Ordering::SeqCst) && reports.len() < flows.len() {
        let skipped: Vec<&str> = flows[reports.len()..].iter().map(|w| w.name.as_str()).collect();
        tracing::warn!(skipped = %skipped.join(", "), "interrupted, remaining flows not started");
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.status != RunStatus::Success)
        .map(|r| r.flow.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("{} of {} runs did not succeed: {}", failed.len(), reports.len(), failed.join(", "));
    }
    Ok(())
}

/// Run each item in order until one of them reports an interrupt.
async fn run_in_order<T, R, F, Fut>(items: &[T], interrupted: &AtomicBool, mut run: F) -> Result<Vec<R>>
where
    T: Copy,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        out.push(run(*item).await?);
    }
    Ok(out)
}

async fn run_one(
    state: &AppState,
    wf: &Workflow,
    vars: ValueMap,
    opts: &ApplyOptions,
    interrupted: &AtomicBool,
) -> Result<RunReport> {
    let progress = if opts.json || opts.quiet {
        None
    } else {
        // Subscribe before the run starts so no event is missed.
        let rx = state.engine.events().subscribe();
        Some(tokio::spawn(render_progress(rx, wf.name.clone())))
    };

    let run = state.engine.apply(wf, vars);
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(flow = %wf.name, "interrupt received, cancelling run");
                interrupted.store(true, Ordering::SeqCst);
                for run_id in state.engine.active_runs() {
                    state.engine.cancel(run_id).await.ok();
                }
            }
        }
    };

    if let Some(handle) = progress {
        if result.is_err() {
            handle.abort();
        }
        handle.await.ok();
    }
    Ok(result?)
}

/// Draw a progress bar from run events until the run for `flow` finishes.
async fn render_progress(mut rx: broadcast::Receiver<RunEvent>, flow: String) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(100));

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "progress display lagged behind events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            RunEvent::RunStarted { flow: f, steps, .. } if f == flow => {
                bar.set_length(steps as u64);
                bar.set_message(format!("running {f}"));
            }
            RunEvent::LoopExpanded { count, .. } => {
                // The template already counts as one unit.
                bar.inc_length(count.saturating_sub(1) as u64);
            }
            RunEvent::StepStarted { step, .. } => bar.set_message(step),
            RunEvent::StepRetrying {
                step,
                attempt,
                delay_ms,
                error,
                ..
            } => bar.println(format!(
                "  {} {step}: attempt {attempt} failed, retrying in {} ({})",
                style("↻").yellow(),
                duration_ms(delay_ms),
                short_error(&error, 60)
            )),
            RunEvent::StepFinished {
                step,
                status,
                duration_ms: ms,
                error,
                ..
            } => {
                bar.inc(1);
                let detail = error.map(|e| format!(" {}", style(short_error(&e, 60)).dim()));
                bar.println(format!(
                    "  {} {step} ({}){}",
                    step_marker(status),
                    duration_ms(ms),
                    detail.unwrap_or_default()
                ));
            }
            RunEvent::RunFinished { flow: f, .. } if f == flow => break,
            _ => {}
        }
    }
    bar.finish_and_clear();
}

fn print_report(report: &RunReport) {
    println!();
    println!(
        "  {} '{}' {} in {} (run {})",
        style("▸").cyan().bold(),
        style(&report.flow).cyan(),
        run_status(report.status),
        duration_ms(report.duration_ms),
        style(report.run_id).dim()
    );

    let mut steps = table(&["Step", "Status", "Attempts", "Duration", "Error"]);
    for step in &report.steps {
        steps.add_row(vec![
            Cell::new(&step.name),
            step_status_cell(step.status),
            Cell::new(step.attempts),
            Cell::new(duration_ms(step.duration_ms)),
            Cell::new(step.error.as_deref().map(|e| short_error(e, 80)).unwrap_or_default()),
        ]);
    }
    println!("{steps}");
    if let Some(err) = &report.error {
        println!("  {} {err}", style("✗").red());
    }
    println!();
}
