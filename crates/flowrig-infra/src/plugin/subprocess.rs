//! External plugin executables.
//!
//! A plugin executable is invoked as `<exe> metadata`, `<exe> actions`, or
//! `<exe> <action>` with the parameters as a JSON object on stdin. A JSON
//! object on stdout is the output map; any other stdout is wrapped as
//! `{"output": ...}`. An `error` key or a non-zero exit fails the call.
//!
//! Children are spawned with `kill_on_drop`, so a step abandoned by its
//! timeout or by run cancellation does not leave the process behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use flowrig_core::plugin::{Plugin, PluginError};
use flowrig_types::plugin::{ActionSpec, PluginMetadata};
use flowrig_types::workflow::ValueMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SubprocessPlugin {
    metadata: PluginMetadata,
    actions: Vec<ActionSpec>,
    executable: PathBuf,
}

impl SubprocessPlugin {
    /// Query the executable for its metadata and action catalog.
    ///
    /// A plugin that cannot describe itself still loads, with minimal
    /// metadata and an empty catalog (which disables catalog validation).
    /// The registered name is always `name`.
    pub async fn load(name: &str, executable: PathBuf) -> Result<Self, PluginError> {
        if !executable.is_file() {
            return Err(PluginError::Invalid {
                name: name.to_string(),
                message: format!("{} is not a file", executable.display()),
            });
        }

        let mut metadata = match query::<PluginMetadata>(name, &executable, "metadata").await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(plugin = %name, error = %e, "plugin did not report metadata");
                PluginMetadata::default()
            }
        };
        if !metadata.name.is_empty() && metadata.name != name {
            tracing::warn!(
                plugin = %name,
                reported = %metadata.name,
                "plugin reports a different name, using the installed name"
            );
        }
        metadata.name = name.to_string();

        let actions = match query::<Vec<ActionSpec>>(name, &executable, "actions").await {
            Ok(actions) => actions,
            Err(e) => {
                tracing::debug!(plugin = %name, error = %e, "plugin did not report actions");
                Vec::new()
            }
        };

        tracing::debug!(
            plugin = %name,
            version = %metadata.version,
            actions = actions.len(),
            executable = %executable.display(),
            "loaded subprocess plugin"
        );
        Ok(Self {
            metadata,
            actions,
            executable,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Plugin for SubprocessPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    async fn execute(&self, action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        let name = &self.metadata.name;
        let input = serde_json::to_vec(&params).map_err(|e| PluginError::Protocol {
            plugin: name.clone(),
            message: format!("failed to encode parameters: {e}"),
        })?;

        let output = run(&self.executable, action, Some(&input)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(PluginError::Execution(with_stderr(
                format!("plugin '{name}' action '{action}' exited with status {code}"),
                &stderr,
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outputs = decode_output(&stdout);
        if let Some(err) = outputs.get("error").filter(|v| !v.is_null()) {
            let message = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(PluginError::Execution(with_stderr(
                format!("plugin '{name}' action '{action}' failed: {message}"),
                &stderr,
            )));
        }
        Ok(outputs)
    }
}

/// Map plugin stdout to an output map.
fn decode_output(stdout: &str) -> ValueMap {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = ValueMap::new();
            map.insert("output".to_string(), other);
            map
        }
        Err(_) => {
            let mut map = ValueMap::new();
            map.insert("output".to_string(), Value::String(stdout.to_string()));
            map
        }
    }
}

fn with_stderr(message: String, stderr: &str) -> String {
    if stderr.is_empty() {
        message
    } else {
        format!("{message}\nstderr: {stderr}")
    }
}

async fn run(
    executable: &Path,
    arg: &str,
    stdin: Option<&[u8]>,
) -> Result<std::process::Output, PluginError> {
    let mut child = Command::new(executable)
        .arg(arg)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            PluginError::Execution(format!("failed to spawn {}: {e}", executable.display()))
        })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // The plugin may exit without reading its input.
        pipe.write_all(input).await.ok();
    }

    child.wait_with_output().await.map_err(PluginError::Io)
}

async fn query<T: serde::de::DeserializeOwned>(
    name: &str,
    executable: &Path,
    command: &str,
) -> Result<T, PluginError> {
    let protocol = |message: String| PluginError::Protocol {
        plugin: name.to_string(),
        message,
    };
    let output = run(executable, command, None).await?;
    if !output.status.success() {
        return Err(protocol(format!("'{command}' exited with {}", output.status)));
    }
    serde_json::from_slice(&output.stdout)
        .map_err(|e| protocol(format!("'{command}' returned invalid JSON: {e}")))
}
