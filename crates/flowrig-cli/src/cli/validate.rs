//! `flowrig validate`.

use anyhow::{bail, Result};
use console::style;

use crate::state::AppState;

/// Validate one flow or all of them. Loading the project already parsed
/// every document and checked chains; this adds graph validation.
pub fn validate(state: &AppState, flow: Option<&str>, json: bool) -> Result<()> {
    let flows = state.project.select(flow)?;

    let mut results = Vec::with_capacity(flows.len());
    for wf in &flows {
        let outcome = state.engine.validate(wf);
        if let Err(err) = &outcome {
            tracing::warn!(flow = %wf.name, error = %err, "flow failed validation");
        }
        results.push((wf.name.as_str(), wf.steps.len(), outcome.err().map(|e| e.to_string())));
    }
    let failures = results.iter().filter(|(_, _, e)| e.is_some()).count();

    if json {
        let out: Vec<_> = results
            .iter()
            .map(|(name, steps, error)| {
                serde_json::json!({
                    "flow": name,
                    "steps": steps,
                    "valid": error.is_none(),
                    "error": error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        for (name, steps, error) in &results {
            match error {
                None => println!(
                    "  {} {} ({steps} steps)",
                    style("✓").green(),
                    style(name).cyan()
                ),
                Some(err) => println!("  {} {}: {err}", style("✗").red(), style(name).cyan()),
            }
        }
        println!();
    }

    if failures > 0 {
        bail!("{failures} of {} flows failed validation", results.len());
    }
    Ok(())
}
