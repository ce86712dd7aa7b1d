//! Execution result types: per-instance step results and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::ValueMap;

/// Lifecycle status of a step instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether the status is final for a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Parse a terminal status name as used in dependency declarations.
    pub fn parse_terminal(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Instance name (`build`, or `deploy[2]` for a loop iteration).
    pub name: String,
    /// Template step name the instance was expanded from.
    pub template: String,
    pub status: StepStatus,
    #[serde(default)]
    pub outputs: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Plugin invocation attempts (0 when the step never ran).
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    /// A result for an instance that never reached `Running`.
    pub fn skipped(name: impl Into<String>, template: impl Into<String>, reason: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            template: template.into(),
            status: StepStatus::Skipped,
            outputs: ValueMap::new(),
            error: reason,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            attempts: 0,
        }
    }
}

/// Overall status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub flow: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Step results in completion order.
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Find the result for an instance by name.
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Results for every instance expanded from `template`.
    pub fn instances_of<'a>(&'a self, template: &'a str) -> impl Iterator<Item = &'a StepResult> + 'a {
        self.steps.iter().filter(move |s| s.template == template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_serde_and_terminal() {
        assert_eq!(serde_json::to_string(&StepStatus::Skipped).unwrap(), "\"skipped\"");
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert_eq!(StepStatus::parse_terminal("success"), Some(StepStatus::Success));
        assert_eq!(StepStatus::parse_terminal("running"), None);
    }

    #[test]
    fn test_skipped_result_has_no_attempts() {
        let r = StepResult::skipped("a[0]", "a", Some("dependency 'b' failed".into()));
        assert_eq!(r.status, StepStatus::Skipped);
        assert_eq!(r.attempts, 0);
        assert_eq!(r.template, "a");
    }
}
