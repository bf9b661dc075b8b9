use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{Credential, ToolContext, ToolResult};

use super::truncate;

const TOOL_NAME: &str = "api_request";

/// Calls a REST API described by the user's `rest_api` credential.
///
/// The credential supplies `base_url` and optionally `api_key` (sent as a
/// bearer token, or under `auth_header` when set).
pub struct ApiRequestTool {
    http: reqwest::Client,
}

impl ApiRequestTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ApiRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ApiRequestInput {
    #[serde(default)]
    path: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    query: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".into()
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn auth_header(cred: &Credential) -> Option<(String, String)> {
    let key = cred.get_str("api_key")?;
    match cred.get_str("auth_header") {
        Some(header) => Some((header.to_string(), key.to_string())),
        None => Some(("Authorization".to_string(), format!("Bearer {}", key))),
    }
}

impl Tool for ApiRequestTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Call the configured REST API. Returns the status line and response body."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path appended to the API base URL" },
                "method": { "type": "string", "description": "HTTP method (default: GET)" },
                "headers": { "type": "object", "description": "Request headers" },
                "query": { "type": "object", "description": "Query string parameters" },
                "body": { "description": "JSON request body" }
            }
        })
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: ApiRequestInput =
                serde_json::from_value(input).map_err(|e| WeftError::ToolValidation(e.to_string()))?;
            let cred = ctx
                .credential
                .as_ref()
                .ok_or_else(|| WeftError::ToolValidation("api_request needs a rest_api credential".into()))?;
            let base = cred
                .get_str("base_url")
                .ok_or_else(|| WeftError::ToolValidation("rest_api credential has no base_url".into()))?;

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| WeftError::ToolValidation(format!("Invalid method: {}", e)))?;

            let mut req = self
                .http
                .request(method, join_url(base, &p.path))
                .timeout(Duration::from_secs(55))
                .query(&p.query);
            if let Some((name, value)) = auth_header(cred) {
                req = req.header(name, value);
            }
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Some(body) = &p.body {
                req = req.json(body);
            }

            let resp = req.send().await.map_err(|e| WeftError::ToolExecution {
                tool: TOOL_NAME.into(),
                message: e.to_string(),
            })?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let summary = format!(
                "HTTP {} {}\n\n{}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                truncate(&body)
            );

            if status.is_success() {
                Ok(ToolResult::success(summary))
            } else {
                Ok(ToolResult::error(summary))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(data: serde_json::Value) -> Credential {
        Credential {
            integration_type: "rest_api".into(),
            name: "api".into(),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn joins_base_and_path() {
        assert_eq!(join_url("https://api.example.com/", "/v1/items"), "https://api.example.com/v1/items");
        assert_eq!(join_url("https://api.example.com", ""), "https://api.example.com");
    }

    #[test]
    fn auth_header_forms() {
        let bearer = cred(serde_json::json!({"base_url": "x", "api_key": "k"}));
        assert_eq!(auth_header(&bearer), Some(("Authorization".into(), "Bearer k".into())));
        let custom = cred(serde_json::json!({"api_key": "k", "auth_header": "X-Api-Key"}));
        assert_eq!(auth_header(&custom), Some(("X-Api-Key".into(), "k".into())));
        assert_eq!(auth_header(&cred(serde_json::json!({}))), None);
    }

    #[tokio::test]
    async fn requires_credential_base_url() {
        let tool = ApiRequestTool::new();
        let err = tool
            .execute(serde_json::json!({"path": "/x"}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolValidation(_)));

        let ctx = ToolContext {
            credential: Some(cred(serde_json::json!({"api_key": "k"}))),
            ..ToolContext::default()
        };
        let err = tool.execute(serde_json::json!({}), ctx).await.unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }
}
