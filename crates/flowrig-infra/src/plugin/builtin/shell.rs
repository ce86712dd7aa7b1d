//! `shell` plugin: run a command through the system shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use flowrig_core::plugin::{Plugin, PluginError};
use flowrig_types::plugin::{ActionSpec, PluginMetadata};
use flowrig_types::workflow::ValueMap;
use serde_json::{json, Value};
use tokio::process::Command;

use super::str_param;

pub struct ShellPlugin {
    metadata: PluginMetadata,
    actions: Vec<ActionSpec>,
    base_dir: PathBuf,
}

impl ShellPlugin {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            metadata: PluginMetadata {
                name: "shell".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: "Run shell commands".to_string(),
                tags: vec!["builtin".to_string()],
                ..Default::default()
            },
            actions: vec![
                ActionSpec::new("exec", "Run a command with `sh -c`")
                    .input("command", "string", true, "Command line to run")
                    .input("working_dir", "string", false, "Working directory, relative to the project")
                    .input("env", "map", false, "Extra environment variables")
                    .output("stdout", "string", "Captured standard output")
                    .output("stderr", "string", "Captured standard error")
                    .output("exit_code", "number", "Process exit code"),
            ],
            base_dir: base_dir.to_path_buf(),
        }
    }

    async fn exec(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let command = str_param(params, "command").unwrap_or_default();
        let working_dir = match str_param(params, "working_dir") {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        };

        let mut cmd = shell_command(command);
        cmd.current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(Value::Object(env)) = params.get("env") {
            for (key, value) in env {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(key, value);
            }
        }

        tracing::debug!(command = %command, dir = %working_dir.display(), "shell exec");
        let output = cmd
            .output()
            .await
            .map_err(|e| PluginError::Execution(format!("failed to run command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let detail = stderr.trim();
            return Err(PluginError::Execution(if detail.is_empty() {
                format!("command exited with code {exit_code}")
            } else {
                format!("command exited with code {exit_code}: {detail}")
            }));
        }

        let mut out = ValueMap::new();
        out.insert("stdout".into(), json!(stdout));
        out.insert("stderr".into(), json!(stderr));
        out.insert("exit_code".into(), json!(exit_code));
        Ok(out)
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl Plugin for ShellPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    async fn execute(&self, action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        match action {
            "exec" => self.exec(&params).await,
            other => Err(PluginError::UnknownAction {
                plugin: self.metadata.name.clone(),
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_exec_captures_output() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellPlugin::new(tmp.path());
        let out = shell
            .execute("exec", params(json!({ "command": "echo hello; echo oops >&2" })))
            .await
            .unwrap();
        assert_eq!(out["stdout"], json!("hello\n"));
        assert_eq!(out["stderr"], json!("oops\n"));
        assert_eq!(out["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_exec_env_and_working_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let shell = ShellPlugin::new(tmp.path());
        let out = shell
            .execute(
                "exec",
                params(json!({
                    "command": "echo \"$GREETING $COUNT\" && basename \"$(pwd)\"",
                    "working_dir": "sub",
                    "env": { "GREETING": "hi", "COUNT": 3 }
                })),
            )
            .await
            .unwrap();
        assert_eq!(out["stdout"], json!("hi 3\nsub\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellPlugin::new(tmp.path());
        let err = shell
            .execute("exec", params(json!({ "command": "echo broken >&2; exit 4" })))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "command exited with code 4: broken");
    }

    #[tokio::test]
    async fn test_catalog_requires_command() {
        let shell = ShellPlugin::new(Path::new("."));
        assert!(shell.validate("exec", &ValueMap::new()).is_err());
        assert!(shell.validate("exec", &params(json!({ "command": "true" }))).is_ok());
        assert!(matches!(
            shell.execute("script", ValueMap::new()).await,
            Err(PluginError::UnknownAction { .. })
        ));
    }
}
