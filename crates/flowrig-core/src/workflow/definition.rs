//! Workflow definition parsing, validation, and filesystem discovery.
//!
//! Converts YAML flow documents into `Workflow` values, validates structural
//! constraints (unique names, known dependencies, non-empty plugin/action),
//! and resolves declared variables against caller-supplied overrides.
//! Validation is purely structural: no expression is evaluated here.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowrig_types::run::StepStatus;
use flowrig_types::workflow::{ValueMap, Workflow};
use thiserror::Error;

/// Scope roots a loop variable must not shadow.
const RESERVED_LOOP_NAMES: &[&str] = &["loop", "var"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised before any step executes.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A step references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `Workflow`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, WorkflowError> {
    let wf: Workflow =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&wf)?;
    Ok(wf)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `Workflow`.
///
/// Checks:
/// - Name is non-empty
/// - At least one step or chain entry exists
/// - Every step has a usable name and non-empty plugin and action
/// - Step names and variable names are unique
/// - Every dependency targets a known sibling step other than itself
/// - Dependency statuses are non-empty terminal status names
/// - Loop variables are non-empty
pub fn validate_definition(wf: &Workflow) -> Result<(), WorkflowError> {
    if wf.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if wf.steps.is_empty() && wf.chain.is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "workflow '{}' must have at least one step or chain entry",
            wf.name
        )));
    }

    let mut seen_vars = HashSet::new();
    for var in &wf.variables {
        if var.name.is_empty() {
            return Err(WorkflowError::ValidationError(
                "variable name must not be empty".to_string(),
            ));
        }
        if !seen_vars.insert(var.name.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate variable: '{}'",
                var.name
            )));
        }
    }

    let mut seen_steps = HashSet::new();
    for step in &wf.steps {
        if step.name.is_empty() {
            return Err(WorkflowError::ValidationError(
                "step name must not be empty".to_string(),
            ));
        }
        if let Some(bad) = step
            .name
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '.' | '[' | ']' | '(' | ')' | ','))
        {
            return Err(WorkflowError::ValidationError(format!(
                "step name '{}' contains invalid character '{}'",
                step.name, bad
            )));
        }
        if step.plugin.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has no plugin",
                step.name
            )));
        }
        if step.action.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has no action",
                step.name
            )));
        }
        if !seen_steps.insert(step.name.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step name: '{}'",
                step.name
            )));
        }
        if let Some(lp) = &step.loop_spec {
            if lp.variable.trim().is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' has an empty loop variable",
                    step.name
                )));
            }
            if RESERVED_LOOP_NAMES.contains(&lp.variable.as_str()) {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' uses reserved name '{}' as its loop variable",
                    step.name, lp.variable
                )));
            }
        }
    }

    for step in &wf.steps {
        for dep in &step.depends_on {
            if dep.step == step.name {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' depends on itself",
                    step.name
                )));
            }
            if !seen_steps.contains(dep.step.as_str()) {
                return Err(WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep.step
                )));
            }
            if dep.status.trim().is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "dependency '{}' of step '{}' has an empty status",
                    dep.step, step.name
                )));
            }
            if StepStatus::parse_terminal(&dep.status).is_none() {
                return Err(WorkflowError::ValidationError(format!(
                    "dependency '{}' of step '{}' requires unknown status '{}' (expected success, failed, or skipped)",
                    dep.step, step.name, dep.status
                )));
            }
        }
    }

    Ok(())
}

/// Check that every flow named by a chain entry exists among `flows`.
pub fn validate_chains(flows: &[Workflow]) -> Result<(), WorkflowError> {
    let names: HashSet<&str> = flows.iter().map(|f| f.name.as_str()).collect();
    for wf in flows {
        for entry in &wf.chain {
            let targets = std::iter::once(Some(&entry.flow))
                .chain([entry.on_success.as_ref(), entry.on_failure.as_ref()])
                .flatten();
            for target in targets {
                if !names.contains(target.as_str()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "flow '{}' chains to unknown flow '{}'",
                        wf.name, target
                    )));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Variable resolution
// ---------------------------------------------------------------------------

/// Resolve declared variables into the run scope.
///
/// Declared defaults are overridden by `overrides`. A required variable with
/// neither a default nor an override, or a value contradicting its declared
/// type, is a validation error. Undeclared overrides pass through.
pub fn resolve_variables(wf: &Workflow, overrides: &ValueMap) -> Result<ValueMap, WorkflowError> {
    let mut resolved = ValueMap::new();

    for decl in &wf.variables {
        let value = overrides
            .get(&decl.name)
            .cloned()
            .or_else(|| decl.default.clone());

        match value {
            Some(value) => {
                if !decl.var_type.accepts(&value) {
                    return Err(WorkflowError::ValidationError(format!(
                        "variable '{}' expects {} but got {}",
                        decl.name, decl.var_type, value
                    )));
                }
                resolved.insert(decl.name.clone(), value);
            }
            None if decl.required => {
                return Err(WorkflowError::ValidationError(format!(
                    "required variable '{}' has no value",
                    decl.name
                )));
            }
            None => {}
        }
    }

    for (name, value) in overrides {
        if !resolved.contains_key(name) {
            tracing::debug!(flow = %wf.name, variable = %name, "undeclared variable override");
            resolved.insert(name.clone(), value.clone());
        }
    }

    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a YAML file. Parse errors carry the file path.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content).map_err(|e| match e {
        WorkflowError::ParseError(msg) => {
            WorkflowError::ParseError(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Discover and load every `.yaml`/`.yml` flow under `base_dir`.
///
/// Results are sorted by path. A missing directory yields no flows; a file
/// that fails to parse or validate is an error.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, WorkflowError> {
    let mut paths = Vec::new();
    if !base_dir.exists() {
        return Ok(Vec::new());
    }
    collect_flow_paths(base_dir, &mut paths)?;
    paths.sort();

    let mut results = Vec::with_capacity(paths.len());
    let mut names = HashSet::new();
    for path in paths {
        let wf = load_workflow_file(&path)?;
        if !names.insert(wf.name.clone()) {
            return Err(WorkflowError::ValidationError(format!(
                "flow '{}' is defined more than once ({})",
                wf.name,
                path.display()
            )));
        }
        results.push((path, wf));
    }
    Ok(results)
}

fn collect_flow_paths(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_flow_paths(&path, paths)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            paths.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowrig_types::workflow::{
        ContinueOn, Dependency, FlowChain, LoopSpec, StepDef, VariableDecl, VariableType,
    };
    use serde_json::json;

    /// Helper: build a shell step with given name and dependencies.
    fn shell_step(name: &str, depends_on: Vec<&str>) -> StepDef {
        StepDef {
            name: name.to_string(),
            description: None,
            plugin: "shell".to_string(),
            action: "exec".to_string(),
            params: ValueMap::new(),
            depends_on: depends_on.into_iter().map(Dependency::on).collect(),
            condition: None,
            loop_spec: None,
            retry: None,
            timeout: None,
            continue_on: ContinueOn::default(),
        }
    }

    fn workflow(name: &str, steps: Vec<StepDef>) -> Workflow {
        Workflow {
            name: name.to_string(),
            description: None,
            version: None,
            variables: vec![],
            steps,
            chain: vec![],
        }
    }

    fn var(name: &str, var_type: VariableType, default: Option<serde_json::Value>, required: bool) -> VariableDecl {
        VariableDecl {
            name: name.to_string(),
            var_type,
            default,
            required,
            description: None,
        }
    }

    #[test]
    fn test_parse_yaml_valid() {
        let yaml = r#"
name: release
steps:
  - name: build
    plugin: shell
    action: exec
    params:
      command: cargo build
  - name: publish
    plugin: shell
    action: exec
    depends_on: [build]
"#;
        let wf = parse_workflow_yaml(yaml).expect("should parse");
        assert_eq!(wf.name, "release");
        assert_eq!(wf.steps.len(), 2);
    }

    #[test]
    fn test_parse_yaml_malformed() {
        let err = parse_workflow_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_validation_rejects_duplicate_step_names() {
        let wf = workflow("w", vec![shell_step("a", vec![]), shell_step("a", vec![])]);
        let msg = validate_definition(&wf).unwrap_err().to_string();
        assert!(msg.contains("duplicate step name"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_unknown_dependency() {
        let wf = workflow("w", vec![shell_step("a", vec!["nonexistent"])]);
        let err = validate_definition(&wf).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency(_)));
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn test_validation_rejects_self_dependency() {
        let wf = workflow("w", vec![shell_step("a", vec!["a"])]);
        let msg = validate_definition(&wf).unwrap_err().to_string();
        assert!(msg.contains("depends on itself"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_empty_workflow() {
        let msg = validate_definition(&workflow("w", vec![])).unwrap_err().to_string();
        assert!(msg.contains("at least one step"), "got: {msg}");
    }

    #[test]
    fn test_validation_accepts_chain_only_workflow() {
        let mut wf = workflow("w", vec![]);
        wf.chain.push(FlowChain {
            flow: "other".to_string(),
            on_success: None,
            on_failure: None,
        });
        assert!(validate_definition(&wf).is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let msg = validate_definition(&workflow(" ", vec![shell_step("a", vec![])]))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("must not be empty"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_missing_plugin_and_action() {
        let mut step = shell_step("a", vec![]);
        step.plugin = String::new();
        let msg = validate_definition(&workflow("w", vec![step])).unwrap_err().to_string();
        assert!(msg.contains("no plugin"), "got: {msg}");

        let mut step = shell_step("a", vec![]);
        step.action = " ".to_string();
        let msg = validate_definition(&workflow("w", vec![step])).unwrap_err().to_string();
        assert!(msg.contains("no action"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_dotted_step_name() {
        let msg = validate_definition(&workflow("w", vec![shell_step("a.b", vec![])]))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("invalid character"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_reserved_loop_variable() {
        for name in ["loop", "var"] {
            let mut each = shell_step("each", vec![]);
            each.loop_spec = Some(LoopSpec {
                over: json!(["a", "b"]),
                variable: name.to_string(),
            });
            let msg = validate_definition(&workflow("w", vec![each])).unwrap_err().to_string();
            assert!(msg.contains("reserved name"), "got: {msg}");
        }

        let mut each = shell_step("each", vec![]);
        each.loop_spec = Some(LoopSpec {
            over: json!(["a", "b"]),
            variable: "item".to_string(),
        });
        assert!(validate_definition(&workflow("w", vec![each])).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_dependency_status() {
        let mut b = shell_step("b", vec![]);
        b.depends_on = vec![Dependency::with_status("a", "")];
        let wf = workflow("w", vec![shell_step("a", vec![]), b.clone()]);
        assert!(validate_definition(&wf).unwrap_err().to_string().contains("empty status"));

        b.depends_on = vec![Dependency::with_status("a", "done")];
        let wf = workflow("w", vec![shell_step("a", vec![]), b]);
        assert!(validate_definition(&wf).unwrap_err().to_string().contains("unknown status"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let wf = workflow(
            "w",
            vec![shell_step("a", vec![]), shell_step("b", vec!["a"])],
        );
        let before = wf.clone();
        assert!(validate_definition(&wf).is_ok());
        assert!(validate_definition(&wf).is_ok());
        assert_eq!(wf, before);
    }

    #[test]
    fn test_validate_chains() {
        let mut a = workflow("a", vec![shell_step("s", vec![])]);
        let b = workflow("b", vec![shell_step("s", vec![])]);
        a.chain.push(FlowChain {
            flow: "a".to_string(),
            on_success: Some("b".to_string()),
            on_failure: None,
        });
        assert!(validate_chains(&[a.clone(), b.clone()]).is_ok());

        a.chain[0].on_failure = Some("missing".to_string());
        let msg = validate_chains(&[a, b]).unwrap_err().to_string();
        assert!(msg.contains("unknown flow 'missing'"), "got: {msg}");
    }

    #[test]
    fn test_resolve_variables_defaults_and_overrides() {
        let mut wf = workflow("w", vec![shell_step("a", vec![])]);
        wf.variables = vec![
            var("env", VariableType::String, Some(json!("staging")), false),
            var("replicas", VariableType::Number, Some(json!(1)), false),
        ];
        let mut overrides = ValueMap::new();
        overrides.insert("replicas".to_string(), json!(3));
        overrides.insert("extra".to_string(), json!(true));

        let vars = resolve_variables(&wf, &overrides).unwrap();
        assert_eq!(vars["env"], json!("staging"));
        assert_eq!(vars["replicas"], json!(3));
        assert_eq!(vars["extra"], json!(true));
    }

    #[test]
    fn test_resolve_variables_missing_required() {
        let mut wf = workflow("w", vec![shell_step("a", vec![])]);
        wf.variables = vec![var("token", VariableType::String, None, true)];
        let msg = resolve_variables(&wf, &ValueMap::new()).unwrap_err().to_string();
        assert!(msg.contains("required variable 'token'"), "got: {msg}");
    }

    #[test]
    fn test_resolve_variables_type_mismatch() {
        let mut wf = workflow("w", vec![shell_step("a", vec![])]);
        wf.variables = vec![var("replicas", VariableType::Number, None, false)];
        let mut overrides = ValueMap::new();
        overrides.insert("replicas".to_string(), json!("three"));
        let msg = resolve_variables(&wf, &overrides).unwrap_err().to_string();
        assert!(msg.contains("expects number"), "got: {msg}");
    }

    #[test]
    fn test_load_and_discover_workflows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: beta\nsteps:\n  - {name: s, plugin: shell, action: exec}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("nested/a.yml"),
            "name: alpha\nsteps:\n  - {name: s, plugin: shell, action: exec}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|(_, wf)| wf.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[test]
    fn test_discover_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "steps: {").unwrap();
        let msg = discover_workflows(dir.path()).unwrap_err().to_string();
        assert!(msg.contains("broken.yaml"), "got: {msg}");
    }

    #[test]
    fn test_discover_rejects_duplicate_flow_names() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "name: same\nsteps:\n  - {name: s, plugin: shell, action: exec}\n";
        std::fs::write(dir.path().join("one.yaml"), doc).unwrap();
        std::fs::write(dir.path().join("two.yaml"), doc).unwrap();
        let msg = discover_workflows(dir.path()).unwrap_err().to_string();
        assert!(msg.contains("more than once"), "got: {msg}");
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        let result = discover_workflows(Path::new("/nonexistent/path")).unwrap();
        assert!(result.is_empty());
    }
}
