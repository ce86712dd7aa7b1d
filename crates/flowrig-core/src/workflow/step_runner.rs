//! Runs one step instance from condition check to terminal result.
//!
//! Order of operations: evaluate the condition, resolve parameters, resolve
//! the retry policy, resolve and validate the plugin, then invoke it under
//! the timeout controller wrapping the retry controller. Every failure maps
//! to a [`StepError`] and ends the instance as `Failed`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flowrig_types::config::RetryDefaults;
use flowrig_types::event::RunEvent;
use flowrig_types::run::{StepResult, StepStatus};
use flowrig_types::workflow::ValueMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::{resolve_params, Scope};
use super::expression::{self, ExpressionError};
use super::loop_expander::{LoopError, StepInstance};
use super::retry::{execute_with_retry, RetryError, RetryPolicy};
use super::timeout::{execute_with_timeout, TimeoutError, TimeoutSettings};
use crate::event::EventBus;
use crate::plugin::{catalog, ArtifactFetcher, PluginError, PluginResolver, PluginStore};

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Why a step instance failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("evaluation error: {0}")]
    Evaluation(#[from] ExpressionError),

    #[error(transparent)]
    LoopExpansion(#[from] LoopError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("plugin resolution failed: {0}")]
    PluginResolution(#[source] PluginError),

    #[error("{0}")]
    InvalidParameters(#[source] PluginError),

    #[error("plugin execution failed: {0}")]
    PluginExecution(#[source] PluginError),

    #[error("operation timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("operation failed after {attempts} attempts, last error: {last}")]
    RetryExhausted { attempts: u32, last: PluginError },

    #[error("cancelled")]
    Cancelled,

    #[error("dependency '{dependency}' finished {actual}, required {required}")]
    DependencyNotMet {
        dependency: String,
        required: String,
        actual: StepStatus,
    },
}

impl StepError {
    /// Short category name, for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evaluation(_) => "evaluation",
            Self::LoopExpansion(_) => "loop_expansion",
            Self::Configuration(_) => "configuration",
            Self::PluginResolution(_) => "plugin_resolution",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::PluginExecution(_) => "plugin_execution",
            Self::Timeout(_) => "timeout",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Cancelled => "cancelled",
            Self::DependencyNotMet { .. } => "dependency_not_met",
        }
    }
}

impl From<RetryError<PluginError>> for StepError {
    fn from(err: RetryError<PluginError>) -> Self {
        match err {
            RetryError::Cancelled { .. } => Self::Cancelled,
            RetryError::NonRetryable { error, .. } => Self::PluginExecution(error),
            RetryError::Exhausted { attempts: 1, last } => Self::PluginExecution(last),
            RetryError::Exhausted { attempts, last } => Self::RetryExhausted { attempts, last },
        }
    }
}

impl From<TimeoutError<RetryError<PluginError>>> for StepError {
    fn from(err: TimeoutError<RetryError<PluginError>>) -> Self {
        match err {
            TimeoutError::Configuration(msg) => Self::Configuration(msg),
            TimeoutError::Elapsed(d) => Self::Timeout(d),
            TimeoutError::Failed(inner) => inner.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes step instances against plugins from one resolver.
pub struct StepRunner<S, F> {
    resolver: Arc<PluginResolver<S, F>>,
    timeouts: TimeoutSettings,
    retry_defaults: RetryDefaults,
    events: EventBus,
}

impl<S: PluginStore, F: ArtifactFetcher> StepRunner<S, F> {
    pub fn new(
        resolver: Arc<PluginResolver<S, F>>,
        timeouts: TimeoutSettings,
        retry_defaults: RetryDefaults,
        events: EventBus,
    ) -> Self {
        Self {
            resolver,
            timeouts,
            retry_defaults,
            events,
        }
    }

    /// Run `instance` to a terminal result.
    ///
    /// `scope` must already carry the instance's loop bindings.
    pub async fn run(
        &self,
        run_id: Uuid,
        instance: &StepInstance,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let attempts = AtomicU32::new(0);

        let outcome = self.execute(run_id, instance, scope, cancel, &attempts).await;

        let (status, outputs, error) = match outcome {
            Ok(Some(outputs)) => {
                tracing::info!(run_id = %run_id, step = %instance.name, "step succeeded");
                (StepStatus::Success, outputs, None)
            }
            Ok(None) => {
                tracing::debug!(run_id = %run_id, step = %instance.name, "condition false, skipping");
                (
                    StepStatus::Skipped,
                    ValueMap::new(),
                    Some("condition evaluated to false".to_string()),
                )
            }
            Err(err) => {
                tracing::warn!(
                    run_id = %run_id,
                    step = %instance.name,
                    kind = err.kind(),
                    error = %err,
                    "step failed"
                );
                (StepStatus::Failed, ValueMap::new(), Some(err.to_string()))
            }
        };

        StepResult {
            name: instance.name.clone(),
            template: instance.template().to_string(),
            status,
            outputs,
            error,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            attempts: attempts.load(Ordering::SeqCst),
        }
    }

    /// `Ok(None)` means the condition was false.
    async fn execute(
        &self,
        run_id: Uuid,
        instance: &StepInstance,
        scope: &Scope,
        cancel: &CancellationToken,
        attempts: &AtomicU32,
    ) -> Result<Option<ValueMap>, StepError> {
        let step = &instance.step;

        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        if let Some(condition) = &step.condition {
            if !expression::evaluate_condition(condition, scope)? {
                return Ok(None);
            }
        }

        let params = resolve_params(&step.params, scope)?;
        // The step field wins over a `timeout` parameter.
        let timeout: Option<Value> = step.timeout.clone().or_else(|| params.get("timeout").cloned());
        let policy =
            RetryPolicy::resolve(step.retry.as_ref(), &self.retry_defaults).map_err(StepError::Configuration)?;

        // A download may take a while; an aborted run must not wait for it.
        let handle = tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            resolved = self.resolver.resolve(&step.plugin) => resolved.map_err(StepError::PluginResolution)?,
        };
        handle
            .validate(&step.action, &params)
            .map_err(StepError::InvalidParameters)?;
        let params = catalog::apply_defaults(handle.actions(), &step.action, params);

        tracing::info!(
            run_id = %run_id,
            step = %instance.name,
            plugin = %step.plugin,
            action = %step.action,
            "step started"
        );
        self.events.publish(RunEvent::StepStarted {
            run_id,
            step: instance.name.clone(),
        });

        let attempt = |n: u32| {
            attempts.store(n, Ordering::SeqCst);
            let handle = handle.clone();
            let params = params.clone();
            let action = step.action.clone();
            async move { handle.execute(&action, params).await }
        };
        let on_retry = |n: u32, delay: Duration, err: &PluginError| {
            self.events.publish(RunEvent::StepRetrying {
                run_id,
                step: instance.name.clone(),
                attempt: n,
                delay_ms: delay.as_millis() as u64,
                error: err.to_string(),
            });
        };

        let (outputs, _) = execute_with_timeout(
            timeout.as_ref(),
            &self.timeouts,
            execute_with_retry(&policy, cancel, attempt, on_retry),
        )
        .await?;
        Ok(Some(outputs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
