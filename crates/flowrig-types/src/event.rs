//! Events emitted while a run progresses.
//!
//! `RunEvent` is broadcast on the engine's event bus. Subscribers (the CLI
//! progress display, logging) may lag or be absent; nothing depends on them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{RunStatus, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run has started; `steps` counts templates, not instances.
    RunStarted {
        run_id: Uuid,
        flow: String,
        steps: usize,
    },

    /// A loop template was expanded into instances.
    LoopExpanded {
        run_id: Uuid,
        step: String,
        count: usize,
    },

    /// An instance entered `Running`.
    StepStarted { run_id: Uuid, step: String },

    /// A failed attempt will be retried after `delay_ms`.
    StepRetrying {
        run_id: Uuid,
        step: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// An instance reached a terminal status.
    StepFinished {
        run_id: Uuid,
        step: String,
        status: StepStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The run ended.
    RunFinished {
        run_id: Uuid,
        flow: String,
        status: RunStatus,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::LoopExpanded { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepRetrying { run_id, .. }
            | Self::StepFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }
}
