use std::sync::Arc;

use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::traits::{CredentialResolver, Tool};
use weft_core::types::{Credential, ToolContext, ToolDefinition};

use crate::integration::integration_for;
use crate::registry::ToolRegistry;

/// Who is invoking a tool, and from where.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub execution_id: String,
    pub block_id: String,
    pub user_id: Option<String>,
}

/// The single tool-invocation path shared by direct tool blocks and model-directed calls.
///
/// Resolves the tool, injects the caller's stored credential for the tool's
/// integration, runs it under the tool's timeout, and maps failures onto the
/// tool error kinds.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    credentials: Option<Arc<dyn CredentialResolver>>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Definitions for the named tools; unknown names are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.registry.definitions_for(names)
    }

    /// Invoke `name` with `args`, returning the tool's textual result.
    pub async fn invoke(&self, name: &str, args: serde_json::Value, ctx: &InvocationContext) -> Result<String> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| WeftError::ToolNotFound(name.to_string()))?;

        let args = strip_reserved_args(args);
        let credential = self.credential_for(tool.as_ref(), ctx).await?;

        let tool_ctx = ToolContext {
            execution_id: ctx.execution_id.clone(),
            block_id: ctx.block_id.clone(),
            user_id: ctx.user_id.clone(),
            credential,
        };

        debug!(tool = %name, block_id = %ctx.block_id, "Invoking tool");

        match self.registry.execute(name, args, tool_ctx).await {
            Ok(result) if result.is_error => Err(WeftError::ToolExecution {
                tool: name.to_string(),
                message: result.content,
            }),
            Ok(result) => Ok(result.content),
            Err(e @ (WeftError::ToolTimeout { .. } | WeftError::ToolExecution { .. } | WeftError::Cancelled)) => Err(e),
            Err(e) => Err(WeftError::ToolExecution {
                tool: name.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn credential_for(&self, tool: &dyn Tool, ctx: &InvocationContext) -> Result<Option<Credential>> {
        let Some(integration) = tool.integration().or_else(|| integration_for(tool.name())) else {
            return Ok(None);
        };
        let missing = || WeftError::CredentialMissing {
            tool: tool.name().to_string(),
            integration: integration.to_string(),
        };

        let (Some(resolver), Some(user_id)) = (self.credentials.as_ref(), ctx.user_id.as_deref()) else {
            return Err(missing());
        };

        match resolver.resolve(user_id, integration).await {
            Ok(Some(credential)) => Ok(Some(credential)),
            Ok(None) => Err(missing()),
            Err(e) => {
                warn!(tool = %tool.name(), integration, error = %e, "Credential lookup failed");
                Err(missing())
            }
        }
    }
}

/// Reserved `__`-prefixed keys never reach a tool.
fn strip_reserved_args(args: serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => serde_json::Value::Object(weft_core::strip_reserved(&map)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::error::ErrorKind;
    use weft_test_utils::{EchoTool, FailingTool, RecordingTool, StaticCredentials};

    fn ctx(user: Option<&str>) -> InvocationContext {
        InvocationContext {
            execution_id: "exec-1".into(),
            block_id: "notify".into(),
            user_id: user.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn injects_credential_and_strips_reserved_args() {
        let tool = RecordingTool::new("send_webhook", "HTTP 200");
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());
        let invoker = ToolInvoker::new(Arc::new(registry)).with_credentials(Arc::new(
            StaticCredentials::new().with("u1", "custom_webhook", serde_json::json!({"webhook_url": "https://x"})),
        ));

        let out = invoker
            .invoke(
                "send_webhook",
                serde_json::json!({"body": "hi", "__user_id__": "u1"}),
                &ctx(Some("u1")),
            )
            .await
            .unwrap();

        assert_eq!(out, "HTTP 200");
        let calls = tool.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, serde_json::json!({"body": "hi"}));
        let cred = calls[0].ctx.credential.as_ref().unwrap();
        assert_eq!(cred.get_str("webhook_url"), Some("https://x"));
    }

    #[tokio::test]
    async fn missing_credential() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::new("send_slack_message", "ok"));
        let invoker = ToolInvoker::new(Arc::new(registry)).with_credentials(Arc::new(StaticCredentials::new()));
        let err = invoker
            .invoke("send_slack_message", serde_json::json!({}), &ctx(Some("u1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
    }

    #[tokio::test]
    async fn resolver_failure_is_missing_credential() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::new("custom", "ok").with_integration("jira"));
        let invoker = ToolInvoker::new(Arc::new(registry)).with_credentials(Arc::new(StaticCredentials::unavailable()));
        let err = invoker.invoke("custom", serde_json::json!({}), &ctx(Some("u1"))).await.unwrap_err();
        assert!(matches!(err, WeftError::CredentialMissing { integration, .. } if integration == "jira"));
    }

    #[tokio::test]
    async fn tools_without_integration_need_no_credential() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::default());
        let invoker = ToolInvoker::new(Arc::new(registry));
        let out = invoker.invoke("echo", serde_json::json!({"a": 1}), &ctx(None)).await.unwrap();
        assert_eq!(out, "{\"a\":1}");
    }

    #[tokio::test]
    async fn error_results_become_tool_execution_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool::named("flaky"));
        let invoker = ToolInvoker::new(Arc::new(registry));
        let err = invoker.invoke("flaky", serde_json::json!({}), &ctx(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionError);
        assert!(err.to_string().contains("upstream returned 500"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let invoker = ToolInvoker::new(Arc::new(ToolRegistry::new()));
        let err = invoker.invoke("ghost", serde_json::json!({}), &ctx(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }
}
