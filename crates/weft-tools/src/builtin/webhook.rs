use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolResult};

use super::truncate;

const TOOL_NAME: &str = "send_webhook";

/// POSTs a payload to a user's configured webhook.
pub struct SendWebhookTool {
    http: reqwest::Client,
}

impl SendWebhookTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for SendWebhookTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct WebhookInput {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".into()
}

impl Tool for SendWebhookTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Send a payload to a webhook URL. Strings are sent as text, objects as JSON."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "body": { "description": "Payload to send (string or JSON object)" },
                "url": { "type": "string", "description": "Override the configured webhook URL" },
                "method": { "type": "string", "description": "HTTP method (default: POST)" },
                "headers": { "type": "object", "description": "Extra request headers" }
            },
            "required": ["body"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        30
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: WebhookInput =
                serde_json::from_value(input).map_err(|e| WeftError::ToolValidation(e.to_string()))?;

            let url = p
                .url
                .or_else(|| {
                    ctx.credential
                        .as_ref()
                        .and_then(|c| c.get_str("webhook_url"))
                        .map(str::to_string)
                })
                .ok_or_else(|| WeftError::ToolValidation("no webhook url in input or credential".into()))?;

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| WeftError::ToolValidation(format!("Invalid method: {}", e)))?;

            let mut req = self.http.request(method, &url).timeout(Duration::from_secs(25));
            if let Some(secret) = ctx.credential.as_ref().and_then(|c| c.get_str("secret")) {
                req = req.header("X-Webhook-Secret", secret);
            }
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req = match p.body {
                Some(serde_json::Value::String(text)) => req.header("Content-Type", "text/plain").body(text),
                Some(value) => req.json(&value),
                None => req,
            };

            let resp = req.send().await.map_err(|e| WeftError::ToolExecution {
                tool: TOOL_NAME.into(),
                message: e.to_string(),
            })?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let summary = format!("HTTP {}\n\n{}", status.as_u16(), truncate(&body));

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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use weft_core::types::Credential;

    /// Accept one HTTP request, answer with `status`, and return the raw request text.
    async fn one_shot_server(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {}\r\ncontent-length: 8\r\nconnection: close\r\n\r\nreceived", status);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{}/hook", addr), handle)
    }

    fn ctx_with(url: &str) -> ToolContext {
        let mut data = serde_json::Map::new();
        data.insert("webhook_url".into(), url.into());
        data.insert("secret".into(), "s3cr3t".into());
        ToolContext {
            credential: Some(Credential {
                integration_type: "custom_webhook".into(),
                name: "hook".into(),
                data,
            }),
            ..ToolContext::default()
        }
    }

    #[tokio::test]
    async fn posts_json_to_credential_url() {
        let (url, server) = one_shot_server("200 OK").await;
        let result = SendWebhookTool::new()
            .execute(serde_json::json!({"body": {"summary": "hello"}}), ctx_with(&url))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.starts_with("HTTP 200"));
        assert!(result.content.contains("received"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.to_ascii_lowercase().contains("x-webhook-secret: s3cr3t"));
        assert!(request.contains("{\"summary\":\"hello\"}"));
    }

    #[tokio::test]
    async fn non_success_status_is_error_result() {
        let (url, server) = one_shot_server("500 Internal Server Error").await;
        let result = SendWebhookTool::new()
            .execute(serde_json::json!({"body": "plain text"}), ctx_with(&url))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.starts_with("HTTP 500"));
        assert!(server.await.unwrap().contains("plain text"));
    }

    #[tokio::test]
    async fn missing_url_is_validation_error() {
        let err = SendWebhookTool::new()
            .execute(serde_json::json!({"body": "x"}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::ToolValidation(_)));
    }
}
