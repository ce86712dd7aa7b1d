//! Coarse run snapshot written after `apply`.
//!
//! This is a reporting artifact: it records the last status of each flow and
//! is never used to resume a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::{RunReport, RunStatus, StepStatus};

/// Contents of `.flowrig/state.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_apply: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flows: BTreeMap<String, FlowSnapshot>,
}

/// Last known outcome of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub steps: BTreeMap<String, StepStatus>,
}

impl RunSnapshot {
    /// Fold a finished run into the snapshot, replacing the flow's previous
    /// entry and keeping the others.
    pub fn record(&mut self, report: &RunReport) {
        let steps = report
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.status))
            .collect();
        self.flows.insert(
            report.flow.clone(),
            FlowSnapshot {
                status: report.status,
                started_at: report.started_at,
                finished_at: report.finished_at,
                duration_ms: report.duration_ms,
                steps,
            },
        );
        self.last_apply = Some(report.finished_at);
    }
}
