//! Loop expansion: one step template into N schedulable instances.
//!
//! A step without a loop spec is the degenerate one-instance case. For a
//! looped step the `over` source is either a literal sequence or an
//! expression that must evaluate to one. Each instance shares the template
//! and carries private bindings for the loop variable and `loop` metadata.

use std::sync::Arc;

use flowrig_types::workflow::{StepDef, ValueMap};
use serde_json::{json, Value};
use thiserror::Error;

use super::context::Scope;
use super::expression::{self, ExpressionError};

/// Errors from expanding a loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("loop source of step '{step}' failed to evaluate: {source}")]
    Expression {
        step: String,
        #[source]
        source: ExpressionError,
    },

    #[error("loop source of step '{step}' must be a list, got {found}")]
    NotSequence { step: String, found: String },
}

/// One concrete, schedulable unit of work.
#[derive(Debug, Clone)]
pub struct StepInstance {
    /// `build` for a plain step, `build[2]` for the third loop iteration.
    pub name: String,
    /// Iteration index for looped steps.
    pub index: Option<usize>,
    pub step: Arc<StepDef>,
    /// Loop variable and `loop` metadata; empty for plain steps.
    pub locals: ValueMap,
}

impl StepInstance {
    pub fn template(&self) -> &str {
        &self.step.name
    }
}

/// Expand `step` against `scope`. Plain steps yield exactly one instance.
pub fn expand(step: &Arc<StepDef>, scope: &Scope) -> Result<Vec<StepInstance>, LoopError> {
    let Some(spec) = &step.loop_spec else {
        return Ok(vec![StepInstance {
            name: step.name.clone(),
            index: None,
            step: Arc::clone(step),
            locals: ValueMap::new(),
        }]);
    };

    let items = match &spec.over {
        Value::Array(items) => items.clone(),
        Value::String(src) => match expression::evaluate(src, scope) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                return Err(LoopError::NotSequence {
                    step: step.name.clone(),
                    found: other.to_string(),
                });
            }
            Err(source) => {
                return Err(LoopError::Expression {
                    step: step.name.clone(),
                    source,
                });
            }
        },
        other => {
            return Err(LoopError::NotSequence {
                step: step.name.clone(),
                found: other.to_string(),
            });
        }
    };

    let count = items.len();
    let instances = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let mut locals = ValueMap::new();
            locals.insert(spec.variable.clone(), item);
            locals.insert(
                "loop".to_string(),
                json!({
                    "index": i,
                    "count": count,
                    "first": i == 0,
                    "last": i + 1 == count,
                }),
            );
            StepInstance {
                name: format!("{}[{}]", step.name, i),
                index: Some(i),
                step: Arc::clone(step),
                locals,
            }
        })
        .collect();

    Ok(instances)
}
