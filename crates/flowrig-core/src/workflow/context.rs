//! Per-run execution context and parameter resolution.
//!
//! `ExecutionContext` holds the resolved variables and the accumulated step
//! results of one run. It is owned by the scheduler, which is its only
//! writer; every step instance evaluates against a [`Scope`] snapshot taken
//! when the instance starts. Results are append-only: each instance writes
//! its entry exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use flowrig_types::run::{StepResult, StepStatus};
use flowrig_types::workflow::ValueMap;
use serde_json::{json, Value};
use uuid::Uuid;

use super::expression::{self, descend, display_value, ExpressionError, Resolver};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single step's outputs (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Immutable snapshot used to evaluate one instance's condition and params.
///
/// Resolution order for the first path segment: `var`, then instance-local
/// bindings (loop variable and `loop`), then step names.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: Arc<Value>,
    steps: Arc<HashMap<String, Value>>,
    locals: ValueMap,
}

impl Scope {
    /// Scope with variables only, as used for planning.
    pub fn with_variables(variables: ValueMap) -> Self {
        Self {
            variables: Arc::new(Value::Object(variables)),
            ..Self::default()
        }
    }

    /// Copy of this scope with instance-local bindings added.
    pub fn with_locals(&self, locals: ValueMap) -> Self {
        Self {
            variables: Arc::clone(&self.variables),
            steps: Arc::clone(&self.steps),
            locals,
        }
    }
}

impl Resolver for Scope {
    fn resolve(&self, path: &[String]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        let root = if head == "var" {
            self.variables.as_ref()
        } else if let Some(local) = self.locals.get(head) {
            local
        } else {
            self.steps.get(head)?
        };
        descend(root, rest).cloned()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Errors from recording results.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("result for step instance '{0}' was already recorded")]
    DuplicateResult(String),
}

/// Run-scoped state: variables plus accumulated step results.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub flow: String,
    pub run_id: Uuid,
    variables: Arc<Value>,
    /// Expression-visible entries keyed by instance and template name.
    steps: Arc<HashMap<String, Value>>,
    /// Full results in completion order.
    results: Vec<StepResult>,
}

impl ExecutionContext {
    pub fn new(flow: impl Into<String>, run_id: Uuid, variables: ValueMap) -> Self {
        Self {
            flow: flow.into(),
            run_id,
            variables: Arc::new(Value::Object(variables)),
            steps: Arc::new(HashMap::new()),
            results: Vec::new(),
        }
    }

    /// Consistent snapshot for evaluating a not-yet-started instance.
    pub fn scope(&self) -> Scope {
        Scope {
            variables: Arc::clone(&self.variables),
            steps: Arc::clone(&self.steps),
            locals: ValueMap::new(),
        }
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    /// Record the terminal result of one instance.
    ///
    /// Oversized outputs are replaced by a truncation marker.
    pub fn record(&mut self, mut result: StepResult) -> Result<(), ContextError> {
        if self.steps.contains_key(&result.name) {
            return Err(ContextError::DuplicateResult(result.name));
        }

        let size = serde_json::to_string(&result.outputs)
            .map(|s| s.len())
            .unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step = %result.name,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            let mut truncated = ValueMap::new();
            truncated.insert("_truncated".to_string(), json!(true));
            truncated.insert("_original_size".to_string(), json!(size));
            result.outputs = truncated;
        }

        Arc::make_mut(&mut self.steps).insert(result.name.clone(), step_entry(&result));
        self.results.push(result);
        Ok(())
    }

    /// Publish the summary entry for a looped template once every instance
    /// is terminal: `output = {results: [...], count: n}` in instance order.
    pub fn record_loop_summary(&mut self, template: &str, instances: &[String]) {
        let mut ordered: Vec<&StepResult> = instances
            .iter()
            .filter_map(|name| self.results.iter().find(|r| &r.name == name))
            .collect();
        ordered.sort_by_key(|r| instance_index(&r.name));

        let outputs: Vec<Value> = ordered
            .iter()
            .map(|r| Value::Object(r.outputs.clone()))
            .collect();
        let status = aggregate_status(ordered.iter().map(|r| r.status));
        let entry = json!({
            "status": status.as_str(),
            "output": { "results": outputs, "count": ordered.len() },
        });
        Arc::make_mut(&mut self.steps).insert(template.to_string(), entry);
    }

    pub fn result(&self, name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}

fn step_entry(result: &StepResult) -> Value {
    json!({
        "status": result.status.as_str(),
        "output": Value::Object(result.outputs.clone()),
        "error": result.error,
    })
}

fn instance_index(name: &str) -> usize {
    name.rsplit_once('[')
        .and_then(|(_, rest)| rest.strip_suffix(']'))
        .and_then(|idx| idx.parse().ok())
        .unwrap_or(0)
}

/// Template-level status of a group of instances: failed if any failed,
/// skipped if all were skipped, success otherwise.
pub fn aggregate_status(statuses: impl IntoIterator<Item = StepStatus>) -> StepStatus {
    let mut any = false;
    let mut all_skipped = true;
    for status in statuses {
        any = true;
        match status {
            StepStatus::Failed => return StepStatus::Failed,
            StepStatus::Skipped => {}
            _ => all_skipped = false,
        }
    }
    if !any || all_skipped {
        StepStatus::Skipped
    } else {
        StepStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Parameter resolution
// ---------------------------------------------------------------------------

/// Resolve every parameter value against `scope`.
pub fn resolve_params(params: &ValueMap, scope: &Scope) -> Result<ValueMap, ExpressionError> {
    params
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, scope)?)))
        .collect()
}

/// Resolve one parameter value.
///
/// - A string that is exactly a function call is evaluated as a whole.
/// - A string that is exactly one `${ expr }` becomes the typed result.
/// - Otherwise each `${ expr }` is spliced in as text; `$${` escapes.
/// - Lists and maps resolve recursively; other values are literals.
pub fn resolve_value(value: &Value, scope: &Scope) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_params(map, scope).map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, scope: &Scope) -> Result<Value, ExpressionError> {
    if expression::is_function_call(s) {
        return expression::evaluate(s, scope);
    }

    let trimmed = s.trim();
    if trimmed.starts_with("${") && trimmed.ends_with('}') && find_close(trimmed, 2) == Some(trimmed.len() - 1) {
        return expression::evaluate(trimmed, scope);
    }

    if !s.contains("${") {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        if rest[..start].ends_with('$') {
            out.push_str(&rest[..start - 1]);
            out.push_str("${");
            rest = &rest[start + 2..];
            continue;
        }
        out.push_str(&rest[..start]);
        let close = find_close(rest, start + 2).ok_or_else(|| ExpressionError::Parse {
            position: s.len() - rest.len() + start,
            message: "unterminated '${'".to_string(),
        })?;
        let value = expression::evaluate(&rest[start + 2..close], scope)?;
        out.push_str(&display_value(&value));
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Index of the `}` closing an interpolation whose body starts at `from`,
/// skipping braces inside quoted strings.
fn find_close(s: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s[from..].char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '}') => return Some(from + i),
            (None, _) => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
