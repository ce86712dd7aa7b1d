//! `file` plugin: read, write, test, and delete files.

use std::path::{Path, PathBuf};

use flowrig_core::plugin::{Plugin, PluginError};
use flowrig_types::plugin::{ActionSpec, PluginMetadata};
use flowrig_types::workflow::ValueMap;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use super::str_param;

pub struct FilePlugin {
    metadata: PluginMetadata,
    actions: Vec<ActionSpec>,
    base_dir: PathBuf,
}

impl FilePlugin {
    pub fn new(base_dir: &Path) -> Self {
        let path_input = "Path, relative to the project directory unless absolute";
        Self {
            metadata: PluginMetadata {
                name: "file".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: "Local file operations".to_string(),
                tags: vec!["builtin".to_string()],
                ..Default::default()
            },
            actions: vec![
                ActionSpec::new("read", "Read a UTF-8 file")
                    .input("path", "string", true, path_input)
                    .output("content", "string", "File contents")
                    .output("size", "number", "Size in bytes"),
                ActionSpec::new("write", "Write a file, creating parent directories")
                    .input("path", "string", true, path_input)
                    .input("content", "string", true, "Content to write")
                    .input_with_default("append", "bool", json!(false), "Append instead of truncating")
                    .output("path", "string", "Resolved path")
                    .output("bytes", "number", "Bytes written"),
                ActionSpec::new("exists", "Check whether a path exists")
                    .input("path", "string", true, path_input)
                    .output("exists", "bool", "Whether the path exists")
                    .output("is_dir", "bool", "Whether the path is a directory"),
                ActionSpec::new("delete", "Delete a file")
                    .input("path", "string", true, path_input)
                    .output("deleted", "bool", "False when the file did not exist"),
            ],
            base_dir: base_dir.to_path_buf(),
        }
    }

    fn resolve(&self, params: &ValueMap) -> PathBuf {
        self.base_dir.join(str_param(params, "path").unwrap_or_default())
    }

    async fn read(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let path = self.resolve(params);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_failure("read", &path, e))?;
        let mut out = ValueMap::new();
        out.insert("size".into(), json!(content.len()));
        out.insert("content".into(), Value::String(content));
        Ok(out)
    }

    async fn write(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let path = self.resolve(params);
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let append = match params.get("append") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("write", &path, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| io_failure("write", &path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_failure("write", &path, e))?;
        file.flush().await.map_err(|e| io_failure("write", &path, e))?;

        let mut out = ValueMap::new();
        out.insert("path".into(), json!(path.display().to_string()));
        out.insert("bytes".into(), json!(content.len()));
        Ok(out)
    }

    async fn exists(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let path = self.resolve(params);
        let meta = tokio::fs::metadata(&path).await.ok();
        let mut out = ValueMap::new();
        out.insert("exists".into(), json!(meta.is_some()));
        out.insert("is_dir".into(), json!(meta.is_some_and(|m| m.is_dir())));
        Ok(out)
    }

    async fn delete(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let path = self.resolve(params);
        let deleted = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_failure("delete", &path, e)),
        };
        let mut out = ValueMap::new();
        out.insert("deleted".into(), json!(deleted));
        Ok(out)
    }
}

fn io_failure(op: &str, path: &Path, err: std::io::Error) -> PluginError {
    PluginError::Execution(format!("failed to {op} {}: {err}", path.display()))
}

impl Plugin for FilePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    async fn execute(&self, action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        match action {
            "read" => self.read(&params).await,
            "write" => self.write(&params).await,
            "exists" => self.exists(&params).await,
            "delete" => self.delete(&params).await,
            other => Err(PluginError::UnknownAction {
                plugin: self.metadata.name.clone(),
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_write_read_append_delete() {
        let tmp = TempDir::new().unwrap();
        let file = FilePlugin::new(tmp.path());

        let out = file
            .execute("write", params(json!({ "path": "out/notes.txt", "content": "one\n" })))
            .await
            .unwrap();
        assert_eq!(out["bytes"], json!(4));

        file.execute(
            "write",
            params(json!({ "path": "out/notes.txt", "content": "two\n", "append": true })),
        )
        .await
        .unwrap();

        let out = file
            .execute("read", params(json!({ "path": "out/notes.txt" })))
            .await
            .unwrap();
        assert_eq!(out["content"], json!("one\ntwo\n"));

        let out = file
            .execute("exists", params(json!({ "path": "out" })))
            .await
            .unwrap();
        assert_eq!(out["exists"], json!(true));
        assert_eq!(out["is_dir"], json!(true));

        let out = file
            .execute("delete", params(json!({ "path": "out/notes.txt" })))
            .await
            .unwrap();
        assert_eq!(out["deleted"], json!(true));
        let out = file
            .execute("delete", params(json!({ "path": "out/notes.txt" })))
            .await
            .unwrap();
        assert_eq!(out["deleted"], json!(false));
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let file = FilePlugin::new(tmp.path());
        let err = file
            .execute("read", params(json!({ "path": "nope.txt" })))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to read"));
    }

    #[test]
    fn test_write_requires_content() {
        let file = FilePlugin::new(Path::new("."));
        let err = file
            .validate("write", &params(json!({ "path": "a.txt" })))
            .unwrap_err();
        assert!(err.to_string().contains("content"));
    }
}
