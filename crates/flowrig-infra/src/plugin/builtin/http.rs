//! `http` plugin: issue an HTTP request.
//!
//! Any response below 500 is returned as outputs so flows can branch on the
//! status. 5xx responses and transport failures are errors whose messages
//! match the default retryable patterns.

use std::collections::BTreeMap;

use flowrig_core::plugin::{Plugin, PluginError};
use flowrig_types::plugin::{ActionSpec, PluginMetadata};
use flowrig_types::workflow::ValueMap;
use serde_json::{json, Value};

use super::str_param;

pub struct HttpPlugin {
    metadata: PluginMetadata,
    actions: Vec<ActionSpec>,
    http: reqwest::Client,
}

impl HttpPlugin {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flowrig/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            metadata: PluginMetadata {
                name: "http".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: "HTTP requests".to_string(),
                tags: vec!["builtin".to_string()],
                ..Default::default()
            },
            actions: vec![
                ActionSpec::new("request", "Send an HTTP request")
                    .input("url", "string", true, "Request URL")
                    .input_with_default("method", "string", json!("GET"), "HTTP method")
                    .input_with_default("headers", "map", json!({}), "Request headers")
                    .input("body", "any", false, "Body; maps and lists are sent as JSON")
                    .output("status", "number", "Response status code")
                    .output("body", "any", "Response body, parsed as JSON when possible")
                    .output("headers", "map", "Response headers"),
            ],
            http,
        }
    }

    async fn request(&self, params: &ValueMap) -> Result<ValueMap, PluginError> {
        let url = str_param(params, "url").unwrap_or_default();
        let method_name = str_param(params, "method").unwrap_or("GET").to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            PluginError::InvalidParams {
                plugin: self.metadata.name.clone(),
                action: "request".to_string(),
                message: format!("invalid HTTP method '{method_name}'"),
            }
        })?;

        let mut request = self.http.request(method, url);
        if let Some(Value::Object(headers)) = params.get("headers") {
            for (key, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(key.as_str(), value);
            }
        }
        request = match params.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(s)) => request.body(s.clone()),
            Some(other) => request.json(other),
        };

        tracing::debug!(method = %method_name, url = %url, "http request");
        let response = request.send().await.map_err(|e| {
            PluginError::Execution(format!("connection error: {method_name} {url}: {e}"))
        })?;

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let text = response.text().await.map_err(|e| {
            PluginError::Execution(format!("network error reading response from {url}: {e}"))
        })?;

        if status.is_server_error() {
            return Err(PluginError::Execution(format!(
                "temporary server error: {method_name} {url} returned {status}"
            )));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let mut out = ValueMap::new();
        out.insert("status".into(), json!(status.as_u16()));
        out.insert("body".into(), body);
        out.insert("headers".into(), json!(headers));
        Ok(out)
    }
}

impl Default for HttpPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for HttpPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    async fn execute(&self, action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        match action {
            "request" => self.request(&params).await,
            other => Err(PluginError::UnknownAction {
                plugin: self.metadata.name.clone(),
                action: other.to_string(),
            }),
        }
    }
}
