//! Parameter checks driven by a plugin's action catalog.

use flowrig_types::plugin::ActionSpec;
use flowrig_types::workflow::ValueMap;
use serde_json::Value;

use super::PluginError;

/// Check `params` against the catalog entry for `action`.
///
/// Required inputs without a default must be present, non-null, and not an
/// empty string. Supplied inputs must match their declared type. Keys the
/// catalog does not mention pass through. An empty catalog accepts anything.
pub fn validate_params(
    plugin: &str,
    actions: &[ActionSpec],
    action: &str,
    params: &ValueMap,
) -> Result<(), PluginError> {
    if actions.is_empty() {
        return Ok(());
    }
    let Some(spec) = actions.iter().find(|a| a.name == action) else {
        return Err(PluginError::UnknownAction {
            plugin: plugin.to_string(),
            action: action.to_string(),
        });
    };

    let invalid = |message: String| PluginError::InvalidParams {
        plugin: plugin.to_string(),
        action: action.to_string(),
        message,
    };

    for (name, input) in &spec.inputs {
        match params.get(name) {
            None | Some(Value::Null) => {
                if input.required && input.default.is_none() {
                    return Err(invalid(format!("missing required input '{name}'")));
                }
            }
            Some(Value::String(s)) if s.is_empty() && input.required => {
                return Err(invalid(format!("required input '{name}' is empty")));
            }
            Some(value) => {
                if !type_matches(&input.input_type, value) {
                    return Err(invalid(format!(
                        "input '{name}' must be of type {}, got {}",
                        input.input_type,
                        type_name(value)
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Fill absent inputs with their catalog defaults.
pub fn apply_defaults(actions: &[ActionSpec], action: &str, mut params: ValueMap) -> ValueMap {
    if let Some(spec) = actions.iter().find(|a| a.name == action) {
        for (name, input) in &spec.inputs {
            if let Some(default) = &input.default {
                let absent = matches!(params.get(name), None | Some(Value::Null));
                if absent {
                    params.insert(name.clone(), default.clone());
                }
            }
        }
    }
    params
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared.to_ascii_lowercase().as_str() {
        "string" => value.is_string(),
        // Numbers often arrive as interpolated strings.
        "number" | "int" | "integer" => {
            value.is_number() || value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
        }
        "bool" | "boolean" => {
            value.is_boolean() || matches!(value.as_str(), Some("true") | Some("false"))
        }
        "list" | "array" => value.is_array(),
        "map" | "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
