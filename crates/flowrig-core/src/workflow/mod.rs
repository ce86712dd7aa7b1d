//! Workflow engine core: definitions, expressions, and the step scheduler.
//!
//! - `definition` -- YAML parsing, validation, discovery, variable resolution
//! - `expression` -- `${...}` interpolation and condition evaluation
//! - `context` -- run-scoped step results and parameter resolution
//! - `loop_expander` -- turns a looped step template into instances
//! - `dag` -- dependency graph, cycle detection, execution plans
//! - `retry` -- backoff policy and the retry loop
//! - `timeout` -- per-step deadlines
//! - `step_runner` -- runs one step instance end to end
//! - `executor` -- readiness-driven parallel executor

pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod loop_expander;
pub mod retry;
pub mod step_runner;
pub mod timeout;
