//! Shared terminal formatting.

use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use flowrig_types::run::{RunStatus, StepStatus};

/// Table with the preset and dynamic layout used across commands.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    let header: Vec<Cell> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                Cell::new(h).fg(Color::Cyan)
            } else {
                Cell::new(h)
            }
        })
        .collect();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn step_status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        StepStatus::Success => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::Yellow),
        StepStatus::Pending | StepStatus::Running => cell,
    }
}

pub fn step_marker(status: StepStatus) -> String {
    match status {
        StepStatus::Success => style("✓").green().to_string(),
        StepStatus::Failed => style("✗").red().to_string(),
        StepStatus::Skipped => style("-").yellow().to_string(),
        StepStatus::Pending | StepStatus::Running => style("…").dim().to_string(),
    }
}

pub fn run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Success => style(status).green().bold().to_string(),
        RunStatus::Failed => style(status).red().bold().to_string(),
        RunStatus::Cancelled => style(status).yellow().bold().to_string(),
    }
}

/// `850ms`, `12.3s`, `4m05s`.
pub fn duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// First line of an error message, shortened for table cells.
pub fn short_error(message: &str, max: usize) -> String {
    let line = message.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
