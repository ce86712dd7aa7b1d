//! Workflow document types.
//!
//! `Workflow` is the parsed form of a flow document. It is produced by the
//! YAML front end and treated as immutable once validated. Step templates
//! (`StepDef`) become schedulable instances only after loop expansion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed map of arbitrary JSON values, used for step parameters and
/// plugin outputs.
pub type ValueMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named workflow: variables, steps, and optional flow chaining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow name within a project.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Variable declarations in document order.
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    /// Step templates.
    #[serde(default)]
    pub steps: Vec<StepDef>,
    /// Flow-to-flow continuation entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<FlowChain>,
}

impl Workflow {
    /// Look up a step template by name.
    pub fn step(&self, name: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A declared workflow variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared type of a variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Bool,
    #[serde(alias = "list(string)", alias = "array")]
    List,
    #[serde(alias = "object")]
    Map,
    #[default]
    Any,
}

impl VariableType {
    /// Whether `value` is an acceptable value for this declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A step template: one plugin action plus its scheduling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique within the owning workflow.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub plugin: String,
    pub action: String,
    /// Parameter values; strings may carry expressions resolved at dispatch.
    #[serde(default)]
    pub params: ValueMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<Dependency>,
    /// Condition expression; absent means always run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    /// Timeout in seconds. Kept untyped so a non-numeric value surfaces as a
    /// configuration error at run time instead of a parse failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,
    #[serde(default)]
    pub continue_on: ContinueOn,
}

/// A dependency on a sibling step reaching a required terminal status.
///
/// Accepts either a bare step name or `{ step, status }` in documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct Dependency {
    pub step: String,
    pub status: String,
}

impl Dependency {
    /// Dependency requiring the default `success` status.
    pub fn on(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: default_dependency_status(),
        }
    }

    pub fn with_status(step: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: status.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Name(String),
    Full {
        step: String,
        #[serde(default = "default_dependency_status")]
        status: String,
    },
}

impl From<DependencyRepr> for Dependency {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Name(step) => Dependency::on(step),
            DependencyRepr::Full { step, status } => Dependency { step, status },
        }
    }
}

fn default_dependency_status() -> String {
    "success".to_string()
}

/// Loop specification: the sequence to iterate and the bound variable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Either an expression string or a literal YAML sequence.
    pub over: Value,
    #[serde(default = "default_loop_variable")]
    pub variable: String,
}

fn default_loop_variable() -> String {
    "item".to_string()
}

/// Retry settings as written in a flow document. Missing fields fall back to
/// the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<DelaySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_errors: Option<Vec<String>>,
}

/// A delay written as seconds (`2`, `0.5`) or a humanized string (`"500ms"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySpec {
    Seconds(f64),
    Text(String),
}

/// Failure tolerance for a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueOn {
    /// When true a failure of this step does not abort the run.
    #[serde(default)]
    pub error: bool,
}

/// Flow-to-flow continuation entry. Declared and validated, never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowChain {
    pub flow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}
