//! `flowrig plugin`: inspect and pre-install manifest plugins.

use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use flowrig_core::plugin::Availability;
use indicatif::{ProgressBar, ProgressStyle};

use super::output::table;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List manifest plugins and whether they are available.
    List,

    /// Download manifest plugins into the plugin directory.
    Install {
        /// Plugin name (omit to install every manifest plugin).
        name: Option<String>,
    },
}

pub async fn run(state: &AppState, command: PluginCommand, json: bool) -> Result<()> {
    match command {
        PluginCommand::List => list(state, json).await,
        PluginCommand::Install { name } => install(state, name.as_deref(), json).await,
    }
}

async fn list(state: &AppState, json: bool) -> Result<()> {
    let status = state.engine.manifest_status();
    let manifest = state.engine.manifest();

    if json {
        let out: Vec<_> = manifest
            .plugins
            .iter()
            .zip(&status)
            .map(|(info, req)| {
                serde_json::json!({
                    "name": info.name,
                    "version": info.version,
                    "repository": info.repository,
                    "availability": req.availability,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if manifest.plugins.is_empty() {
        println!();
        match &state.project.manifest_path {
            Some(path) => println!("  No plugins declared in {}.", style(path.display()).dim()),
            None => println!("  No plugin manifest found."),
        }
        println!();
        return Ok(());
    }

    let mut t = table(&["Plugin", "Version", "Repository", "Availability"]);
    for (info, req) in manifest.plugins.iter().zip(&status) {
        let color = match req.availability {
            Availability::Loaded | Availability::Installed => Color::Green,
            Availability::Download => Color::Yellow,
            Availability::Missing => Color::Red,
        };
        t.add_row(vec![
            Cell::new(&info.name),
            Cell::new(&info.version),
            Cell::new(&info.repository),
            Cell::new(req.availability.as_str()).fg(color),
        ]);
    }
    println!();
    println!("{t}");
    println!(
        "  Plugin directory: {}",
        style(state.project.plugin_dir.display()).dim()
    );
    println!();
    Ok(())
}

async fn install(state: &AppState, name: Option<&str>, json: bool) -> Result<()> {
    let manifest = state.engine.manifest();
    let names: Vec<&str> = match name {
        Some(n) => {
            if !manifest.plugins.iter().any(|p| p.name == n) {
                bail!("plugin '{n}' is not declared in the manifest");
            }
            vec![n]
        }
        None => manifest.plugins.iter().map(|p| p.name.as_str()).collect(),
    };

    let spinner = (!json).then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner
    });

    let mut results = Vec::with_capacity(names.len());
    for n in &names {
        if let Some(spinner) = &spinner {
            spinner.set_message(format!("Resolving {n}..."));
        }
        let outcome = state.engine.install(n).await;
        if let Some(spinner) = &spinner {
            match &outcome {
                Ok(from) => spinner.println(format!(
                    "  {} {} ({})",
                    style("✓").green(),
                    style(n).cyan(),
                    from.as_str()
                )),
                Err(err) => spinner.println(format!("  {} {}: {err}", style("✗").red(), style(n).cyan())),
            }
        }
        results.push((*n, outcome));
    }
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    if json {
        let out: Vec<_> = results
            .iter()
            .map(|(n, outcome)| match outcome {
                Ok(from) => serde_json::json!({ "name": n, "resolved_from": from.as_str() }),
                Err(err) => serde_json::json!({ "name": n, "error": err.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    }

    let failures = results.iter().filter(|(_, o)| o.is_err()).count();
    if failures > 0 {
        bail!("{failures} of {} plugins failed to install", results.len());
    }
    Ok(())
}
