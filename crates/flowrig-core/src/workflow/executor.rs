//! Workflow executor: readiness-driven parallel execution of a step graph.
//!
//! The `DagExecutor` keeps one state record per step template. A template
//! becomes ready once every template it depends on is terminal; it is then
//! gated on the required dependency statuses, loop-expanded against the
//! current context, and its instances are spawned onto a `tokio::JoinSet`.
//! Instances with no ordering relation run concurrently, optionally capped
//! by `max_parallel`.
//!
//! # Failure and cancellation
//!
//! The first `Failed` instance whose step does not set `continue_on.error`
//! cancels the run token. In-flight instances observe the token and end as
//! `Failed`; templates and instances that never started are recorded as
//! `Skipped`. A run-level deadline and [`WorkflowExecutor::cancel`] use the
//! same token.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use flowrig_types::config::GlobalConfig;
use flowrig_types::event::RunEvent;
use flowrig_types::run::{RunReport, RunStatus, StepResult, StepStatus};
use flowrig_types::workflow::{StepDef, ValueMap, Workflow};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::{ContextError, ExecutionContext};
use super::dag::StepGraph;
use super::definition::{resolve_variables, validate_definition, WorkflowError};
use super::loop_expander::{self, StepInstance};
use super::step_runner::{StepError, StepRunner};
use super::timeout::TimeoutSettings;
use crate::event::EventBus;
use crate::plugin::{ArtifactFetcher, PluginResolver, PluginStore};

/// Reason recorded for instances that never started because the run ended.
const NOT_STARTED: &str = "not started: run aborted";

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
pub trait WorkflowExecutor: Send + Sync {
    /// Validate and run `workflow` with caller-supplied variable overrides.
    ///
    /// Step failures are reported in the returned [`RunReport`]; `Err` means
    /// the run could not start or the executor itself broke.
    fn execute(
        &self,
        workflow: &Workflow,
        variables: ValueMap,
    ) -> impl std::future::Future<Output = Result<RunReport, ExecutorError>> + Send;

    /// Cancel an active run.
    fn cancel(&self, run_id: Uuid) -> impl std::future::Future<Output = Result<(), ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("step task failed: {0}")]
    Join(String),

    #[error("no active run with id {0}")]
    RunNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Template state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum TemplateState {
    /// Waiting on `remaining` dependency templates.
    Waiting { remaining: usize },
    /// Instances launched; `pending` not yet terminal.
    Running { pending: usize, instances: Vec<String> },
    Done,
}

/// Why the run stopped launching work.
#[derive(Debug, Clone, PartialEq)]
enum Abort {
    StepFailed(String),
    TimedOut(Duration),
    Cancelled,
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

pub struct DagExecutor<S, F> {
    runner: Arc<StepRunner<S, F>>,
    events: EventBus,
    max_parallel: Option<usize>,
    run_timeout: Option<Duration>,
    /// Cancellation tokens keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<S, F> DagExecutor<S, F>
where
    S: PluginStore + 'static,
    F: ArtifactFetcher + 'static,
{
    pub fn new(resolver: Arc<PluginResolver<S, F>>, config: &GlobalConfig, events: EventBus) -> Self {
        let runner = StepRunner::new(
            resolver,
            TimeoutSettings::from(&config.timeouts),
            config.retry.clone(),
            events.clone(),
        );
        Self {
            runner: Arc::new(runner),
            events,
            max_parallel: config.max_parallel.filter(|n| *n > 0),
            run_timeout: config.timeouts.run_secs.map(Duration::from_secs),
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Ids of runs currently executing.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        graph: &StepGraph,
        ctx: &mut ExecutionContext,
        token: &CancellationToken,
    ) -> Result<Option<Abort>, ExecutorError> {
        let run_id = ctx.run_id;
        let steps: Vec<Arc<StepDef>> = workflow.steps.iter().cloned().map(Arc::new).collect();

        let mut states: Vec<TemplateState> = (0..steps.len())
            .map(|i| TemplateState::Waiting {
                remaining: graph.in_degree(i),
            })
            .collect();
        let mut ready: VecDeque<usize> = graph
            .topological_order()
            .iter()
            .copied()
            .filter(|&i| graph.in_degree(i) == 0)
            .collect();
        let mut launch: VecDeque<(usize, StepInstance)> = VecDeque::new();
        let mut join_set: JoinSet<(usize, StepResult)> = JoinSet::new();

        let deadline = self.run_timeout.map(|d| (tokio::time::Instant::now() + d, d));
        let mut abort: Option<Abort> = None;

        loop {
            if abort.is_none() && token.is_cancelled() {
                abort = Some(Abort::Cancelled);
            }

            // Gate and expand templates whose dependencies are all terminal.
            while let Some(idx) = ready.pop_front() {
                let step = &steps[idx];
                let outcome = if abort.is_some() {
                    Err(skipped(&step.name, NOT_STARTED))
                } else if let Err(err) = check_dependencies(step, ctx) {
                    tracing::debug!(run_id = %run_id, step = %step.name, reason = %err, "dependency gate closed");
                    Err(skipped(&step.name, &err.to_string()))
                } else {
                    match loop_expander::expand(step, &ctx.scope()) {
                        Ok(instances) if instances.is_empty() => {
                            Err(skipped(&step.name, "loop over zero items"))
                        }
                        Ok(instances) => Ok(instances),
                        Err(err) => Err(failed(&step.name, &StepError::LoopExpansion(err))),
                    }
                };

                match outcome {
                    Ok(instances) => {
                        if step.loop_spec.is_some() {
                            tracing::debug!(run_id = %run_id, step = %step.name, count = instances.len(), "loop expanded");
                            self.events.publish(RunEvent::LoopExpanded {
                                run_id,
                                step: step.name.clone(),
                                count: instances.len(),
                            });
                        }
                        states[idx] = TemplateState::Running {
                            pending: instances.len(),
                            instances: instances.iter().map(|i| i.name.clone()).collect(),
                        };
                        launch.extend(instances.into_iter().map(|inst| (idx, inst)));
                    }
                    Err(result) => {
                        if result.status == StepStatus::Failed && !step.continue_on.error && abort.is_none() {
                            abort = Some(Abort::StepFailed(format!(
                                "step '{}' failed: {}",
                                step.name,
                                result.error.as_deref().unwrap_or_default()
                            )));
                            token.cancel();
                        }
                        self.finish(ctx, result)?;
                        states[idx] = TemplateState::Done;
                        release_dependents(graph, idx, &mut states, &mut ready);
                    }
                }
            }

            // Drop work that can no longer start.
            if abort.is_some() {
                while let Some((idx, inst)) = launch.pop_front() {
                    self.finish(ctx, skipped_instance(&inst, NOT_STARTED))?;
                    complete_instance(ctx, graph, idx, &steps, &mut states, &mut ready);
                }
                if !ready.is_empty() {
                    continue;
                }
            }

            while self.max_parallel.is_none_or(|max| join_set.len() < max) {
                let Some((idx, inst)) = launch.pop_front() else {
                    break;
                };
                let scope = ctx.scope().with_locals(inst.locals.clone());
                let runner = Arc::clone(&self.runner);
                let token = token.clone();
                join_set.spawn(async move {
                    let result = runner.run(run_id, &inst, &scope, &token).await;
                    (idx, result)
                });
            }

            if join_set.is_empty() {
                if launch.is_empty() && ready.is_empty() {
                    break;
                }
                continue;
            }

            let joined = tokio::select! {
                joined = join_set.join_next() => joined,
                _ = token.cancelled(), if abort.is_none() => continue,
                _ = async {
                    match deadline {
                        Some((at, _)) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if abort.is_none() && deadline.is_some() => {
                    if let Some((_, limit)) = deadline {
                        tracing::warn!(run_id = %run_id, limit_secs = limit.as_secs(), "run deadline reached, cancelling");
                        abort = Some(Abort::TimedOut(limit));
                    }
                    token.cancel();
                    continue;
                }
            };

            let Some(joined) = joined else {
                continue;
            };
            let (idx, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    token.cancel();
                    return Err(ExecutorError::Join(err.to_string()));
                }
            };

            // A result that raced an external cancel is not the step's fault.
            if abort.is_none() && token.is_cancelled() {
                abort = Some(Abort::Cancelled);
            }
            if result.status == StepStatus::Failed && !steps[idx].continue_on.error && abort.is_none() {
                abort = Some(Abort::StepFailed(format!(
                    "step '{}' failed: {}",
                    result.name,
                    result.error.as_deref().unwrap_or_default()
                )));
                token.cancel();
            }
            self.finish(ctx, result)?;
            complete_instance(ctx, graph, idx, &steps, &mut states, &mut ready);
        }

        Ok(abort)
    }

    /// Record a terminal result and announce it.
    fn finish(&self, ctx: &mut ExecutionContext, result: StepResult) -> Result<(), ExecutorError> {
        self.events.publish(RunEvent::StepFinished {
            run_id: ctx.run_id,
            step: result.name.clone(),
            status: result.status,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
        });
        ctx.record(result)?;
        Ok(())
    }
}

impl<S, F> WorkflowExecutor for DagExecutor<S, F>
where
    S: PluginStore + 'static,
    F: ArtifactFetcher + 'static,
{
    async fn execute(&self, workflow: &Workflow, variables: ValueMap) -> Result<RunReport, ExecutorError> {
        validate_definition(workflow)?;
        let graph = StepGraph::build(&workflow.steps)?;
        let variables = resolve_variables(workflow, &variables)?;

        let run_id = Uuid::now_v7();
        let token = CancellationToken::new();
        self.cancellation_tokens.insert(run_id, token.clone());

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut ctx = ExecutionContext::new(workflow.name.clone(), run_id, variables);

        self.events.publish(RunEvent::RunStarted {
            run_id,
            flow: workflow.name.clone(),
            steps: workflow.steps.len(),
        });
        tracing::info!(run_id = %run_id, flow = %workflow.name, steps = workflow.steps.len(), "starting run");

        let outcome = self.drive(workflow, &graph, &mut ctx, &token).await;
        self.cancellation_tokens.remove(&run_id);
        let abort = outcome?;

        let (status, error) = match abort {
            None => (RunStatus::Success, None),
            Some(Abort::StepFailed(msg)) => (RunStatus::Failed, Some(msg)),
            Some(Abort::TimedOut(limit)) => (
                RunStatus::Failed,
                Some(format!("run timed out after {}s", limit.as_secs())),
            ),
            Some(Abort::Cancelled) => (RunStatus::Cancelled, Some("run cancelled".to_string())),
        };
        let duration_ms = clock.elapsed().as_millis() as u64;

        self.events.publish(RunEvent::RunFinished {
            run_id,
            flow: workflow.name.clone(),
            status,
            duration_ms,
        });
        tracing::info!(run_id = %run_id, flow = %workflow.name, status = %status, duration_ms, "run finished");

        Ok(RunReport {
            run_id,
            flow: workflow.name.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            steps: ctx.into_results(),
            error,
        })
    }

    async fn cancel(&self, run_id: Uuid) -> Result<(), ExecutorError> {
        let token = self
            .cancellation_tokens
            .get(&run_id)
            .map(|t| t.clone())
            .ok_or(ExecutorError::RunNotFound(run_id))?;
        tracing::info!(run_id = %run_id, "cancelling run");
        token.cancel();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every instance of every dependency must have reached its required status.
fn check_dependencies(step: &StepDef, ctx: &ExecutionContext) -> Result<(), StepError> {
    for dep in &step.depends_on {
        for result in ctx.results().iter().filter(|r| r.template == dep.step) {
            if result.status.as_str() != dep.status {
                return Err(StepError::DependencyNotMet {
                    dependency: result.name.clone(),
                    required: dep.status.clone(),
                    actual: result.status,
                });
            }
        }
    }
    Ok(())
}

fn skipped(template: &str, reason: &str) -> StepResult {
    StepResult::skipped(template, template, Some(reason.to_string()))
}

fn skipped_instance(inst: &StepInstance, reason: &str) -> StepResult {
    StepResult::skipped(inst.name.clone(), inst.template(), Some(reason.to_string()))
}

fn failed(template: &str, err: &StepError) -> StepResult {
    let mut result = skipped(template, "");
    result.status = StepStatus::Failed;
    result.error = Some(err.to_string());
    result
}

/// Count down the template of a finished instance; release dependents once
/// the template is terminal.
fn complete_instance(
    ctx: &mut ExecutionContext,
    graph: &StepGraph,
    idx: usize,
    steps: &[Arc<StepDef>],
    states: &mut [TemplateState],
    ready: &mut VecDeque<usize>,
) {
    let TemplateState::Running { pending, instances } = &mut states[idx] else {
        return;
    };
    *pending -= 1;
    if *pending > 0 {
        return;
    }
    if steps[idx].loop_spec.is_some() {
        ctx.record_loop_summary(&steps[idx].name, instances);
    }
    states[idx] = TemplateState::Done;
    release_dependents(graph, idx, states, ready);
}

fn release_dependents(graph: &StepGraph, idx: usize, states: &mut [TemplateState], ready: &mut VecDeque<usize>) {
    let mut dependents: Vec<usize> = graph.dependents(idx).collect();
    dependents.sort_unstable();
    dependents.dedup();
    for dep in dependents {
        if let TemplateState::Waiting { remaining } = &mut states[dep] {
            *remaining -= 1;
            if *remaining == 0 {
                ready.push_back(dep);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{resolver_with, EmptyStore, FakePlugin, NoFetcher};
    use crate::plugin::PluginError;
    use flowrig_types::workflow::{ContinueOn, Dependency, LoopSpec, RetrySpec};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;

    fn step(name: &str, plugin: &str, deps: &[&str]) -> StepDef {
        StepDef {
            name: name.to_string(),
            description: None,
            plugin: plugin.to_string(),
            action: "run".to_string(),
            params: ValueMap::new(),
            depends_on: deps.iter().map(|d| Dependency::on(*d)).collect(),
            condition: None,
            loop_spec: None,
            retry: None,
            timeout: None,
            continue_on: ContinueOn::default(),
        }
    }

    fn with_params(mut s: StepDef, params: Value) -> StepDef {
        s.params = params.as_object().cloned().unwrap();
        s
    }

    fn workflow(steps: Vec<StepDef>) -> Workflow {
        Workflow {
            name: "deploy".to_string(),
            description: None,
            version: None,
            variables: vec![],
            steps,
            chain: vec![],
        }
    }

    fn config() -> GlobalConfig {
        let mut config = GlobalConfig::default();
        config.retry.jitter = false;
        config
    }

    fn executor(plugins: &[&FakePlugin], config: &GlobalConfig) -> DagExecutor<EmptyStore, NoFetcher> {
        DagExecutor::new(resolver_with(plugins), config, EventBus::new(256))
    }

    fn status(report: &RunReport, name: &str) -> StepStatus {
        report.step(name).unwrap_or_else(|| panic!("no result for {name}")).status
    }

    #[tokio::test]
    async fn test_diamond_runs_in_dependency_order() {
        let fake = FakePlugin::new("shell").with_delay(Duration::from_millis(5));
        let exec = executor(&[&fake], &config());
        let wf = workflow(vec![
            step("a", "shell", &[]),
            step("b", "shell", &["a"]),
            step("c", "shell", &["a"]),
            step("d", "shell", &["b", "c"]),
        ]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.steps.len(), 4);

        let pos = |n: &str| report.steps.iter().position(|s| s.name == n).unwrap();
        assert!(pos("a") < pos("b") && pos("a") < pos("c"));
        assert!(pos("d") > pos("b") && pos("d") > pos("c"));
        let a = report.step("a").unwrap();
        let d = report.step("d").unwrap();
        assert!(d.started_at >= a.finished_at);
        assert!(exec.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let fake = FakePlugin::new("shell").with_delay(Duration::from_millis(50));
        let exec = executor(&[&fake], &config());
        let wf = workflow((0..4).map(|i| step(&format!("s{i}"), "shell", &[])).collect());
        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(fake.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_max_parallel_caps_concurrency() {
        let fake = FakePlugin::new("shell").with_delay(Duration::from_millis(20));
        let mut cfg = config();
        cfg.max_parallel = Some(2);
        let exec = executor(&[&fake], &cfg);
        let wf = workflow((0..5).map(|i| step(&format!("s{i}"), "shell", &[])).collect());
        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.steps.len(), 5);
        assert_eq!(fake.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_step_runs() {
        let fake = FakePlugin::new("shell");
        let exec = executor(&[&fake], &config());
        let wf = workflow(vec![step("a", "shell", &["b"]), step("b", "shell", &["a"])]);
        let err = exec.execute(&wf, ValueMap::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Workflow(WorkflowError::CycleDetected(_))));
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_skips_success_dependents_and_fails_run() {
        let bad = FakePlugin::new("bad").failing("permission denied");
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&bad, &ok], &config());
        let wf = workflow(vec![step("a", "bad", &[]), step("b", "shell", &["a"])]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(status(&report, "a"), StepStatus::Failed);
        assert_eq!(status(&report, "b"), StepStatus::Skipped);
        assert_eq!(ok.call_count(), 0);
        assert!(report.error.unwrap().contains("step 'a' failed"));
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_failure_handlers() {
        let bad = FakePlugin::new("bad").failing("permission denied");
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&bad, &ok], &config());

        let mut a = step("a", "bad", &[]);
        a.continue_on.error = true;
        let mut on_fail = step("notify", "shell", &[]);
        on_fail.depends_on = vec![Dependency::with_status("a", "failed")];
        let wf = workflow(vec![a, step("next", "shell", &["a"]), on_fail, step("other", "shell", &[])]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(status(&report, "a"), StepStatus::Failed);
        assert_eq!(status(&report, "next"), StepStatus::Skipped);
        assert_eq!(status(&report, "notify"), StepStatus::Success);
        assert_eq!(status(&report, "other"), StepStatus::Success);
    }

    #[tokio::test]
    async fn test_abort_cancels_in_flight_and_skips_unstarted() {
        let bad = FakePlugin::new("bad").failing("permission denied");
        let slow = FakePlugin::new("slow").hanging();
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&bad, &slow, &ok], &config());
        let wf = workflow(vec![
            step("hang", "slow", &[]),
            step("boom", "bad", &[]),
            step("after", "shell", &["hang"]),
        ]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(status(&report, "boom"), StepStatus::Failed);
        let hang = report.step("hang").unwrap();
        assert_eq!(hang.status, StepStatus::Failed);
        assert_eq!(hang.error.as_deref(), Some("cancelled"));
        let after = report.step("after").unwrap();
        assert_eq!(after.status, StepStatus::Skipped);
        assert_eq!(ok.call_count(), 0);
    }

    #[tokio::test]
    async fn test_condition_false_skips_and_releases_dependents() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let mut gated = step("gated", "shell", &[]);
        gated.condition = Some("equal(\"a\", \"b\")".to_string());
        let mut after = step("after", "shell", &[]);
        after.depends_on = vec![Dependency::with_status("gated", "skipped")];
        let wf = workflow(vec![gated, after]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(status(&report, "gated"), StepStatus::Skipped);
        assert_eq!(status(&report, "after"), StepStatus::Success);
    }

    #[tokio::test]
    async fn test_loop_instances_and_summary_output() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let mut ping = with_params(step("ping", "shell", &[]), json!({ "host": "${host}" }));
        ping.loop_spec = Some(LoopSpec {
            over: json!(["a", "b", "c"]),
            variable: "host".to_string(),
        });
        let report_step = with_params(
            step("report", "shell", &["ping"]),
            json!({ "count": "${ping.output.count}", "last": "${ping.output.results.2.host}" }),
        );
        let wf = workflow(vec![ping, report_step]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.instances_of("ping").count(), 3);
        assert_eq!(report.step("ping[1]").unwrap().outputs["host"], json!("b"));
        let summary = report.step("report").unwrap();
        assert_eq!(summary.outputs["count"], json!(3));
        assert_eq!(summary.outputs["last"], json!("c"));
    }

    #[tokio::test]
    async fn test_loop_over_prior_output_and_per_instance_condition() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let list = with_params(step("list", "shell", &[]), json!({ "hosts": ["x", "y"] }));
        let mut each = step("each", "shell", &["list"]);
        each.loop_spec = Some(LoopSpec {
            over: json!("list.output.hosts"),
            variable: "h".to_string(),
        });
        each.condition = Some("equal(h, \"y\")".to_string());
        let wf = workflow(vec![list, each]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(status(&report, "each[0]"), StepStatus::Skipped);
        assert_eq!(status(&report, "each[1]"), StepStatus::Success);
        assert_eq!(ok.call_count(), 2);
    }

    #[tokio::test]
    async fn test_dependent_of_loop_waits_for_all_instances() {
        let flaky = FakePlugin::new("flaky").with_behavior(|n, _| {
            if n == 2 {
                Err(PluginError::Execution("bad host".to_string()))
            } else {
                Ok(ValueMap::new())
            }
        });
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&flaky, &ok], &config());
        let mut each = step("each", "flaky", &[]);
        each.loop_spec = Some(LoopSpec {
            over: json!([1, 2, 3]),
            variable: "n".to_string(),
        });
        each.continue_on.error = true;
        let wf = workflow(vec![each, step("after", "shell", &["each"])]);

        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.instances_of("each").filter(|r| r.status == StepStatus::Failed).count(), 1);
        assert_eq!(status(&report, "after"), StepStatus::Skipped);
        assert_eq!(ok.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_loop_records_skipped_template() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let mut each = step("each", "shell", &[]);
        each.loop_spec = Some(LoopSpec {
            over: json!([]),
            variable: "n".to_string(),
        });
        let report = exec.execute(&workflow(vec![each]), ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(status(&report, "each"), StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_loop_expansion_error_fails_template() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let mut each = step("each", "shell", &[]);
        each.loop_spec = Some(LoopSpec {
            over: json!("\"not a list\""),
            variable: "n".to_string(),
        });
        let report = exec.execute(&workflow(vec![each]), ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.step("each").unwrap().error.as_ref().unwrap().contains("must be a list"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_within_run() {
        let flaky = FakePlugin::new("http").with_behavior(|n, _| {
            if n < 3 {
                Err(PluginError::Execution("network unreachable".to_string()))
            } else {
                Ok(ValueMap::new())
            }
        });
        let exec = executor(&[&flaky], &config());
        let mut s = step("fetch", "http", &[]);
        s.retry = Some(RetrySpec {
            max_attempts: Some(3),
            ..Default::default()
        });
        let report = exec.execute(&workflow(vec![s]), ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.step("fetch").unwrap().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_fails_run() {
        let slow = FakePlugin::new("slow").hanging();
        let mut cfg = config();
        cfg.timeouts.run_secs = Some(10);
        cfg.timeouts.default_secs = 60;
        let exec = executor(&[&slow], &cfg);
        let report = exec
            .execute(&workflow(vec![step("wait", "slow", &[])]), ValueMap::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("run timed out after 10s"));
        assert_eq!(report.step("wait").unwrap().error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let slow = FakePlugin::new("slow").hanging();
        let exec = Arc::new(executor(&[&slow], &config()));
        let mut rx = exec.events().subscribe();

        let canceller = Arc::clone(&exec);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let RunEvent::StepStarted { run_id, .. } = event {
                    canceller.cancel(run_id).await.unwrap();
                    break;
                }
            }
        });

        let wf = workflow(vec![step("wait", "slow", &[]), step("after", "slow", &["wait"])]);
        let report = exec.execute(&wf, ValueMap::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.error.as_deref(), Some("run cancelled"));
        assert_eq!(report.step("wait").unwrap().error.as_deref(), Some("cancelled"));
        assert_eq!(status(&report, "after"), StepStatus::Skipped);
        assert!(matches!(
            exec.cancel(report.run_id).await,
            Err(ExecutorError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_required_variable_is_validation_error() {
        let exec = executor(&[], &config());
        let mut wf = workflow(vec![step("a", "shell", &[])]);
        wf.variables = vec![serde_json::from_value(json!({ "name": "env", "required": true })).unwrap()];
        let err = exec.execute(&wf, ValueMap::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Workflow(WorkflowError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_events_cover_run_lifecycle() {
        let ok = FakePlugin::new("shell");
        let exec = executor(&[&ok], &config());
        let mut rx = exec.events().subscribe();
        exec.execute(&workflow(vec![step("a", "shell", &[])]), ValueMap::new())
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                RunEvent::RunStarted { .. } => "run_started",
                RunEvent::StepStarted { .. } => "step_started",
                RunEvent::StepFinished { .. } => "step_finished",
                RunEvent::RunFinished { .. } => "run_finished",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["run_started", "step_started", "step_finished", "run_finished"]);
    }
}
