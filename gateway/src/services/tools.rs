//! Tool invocation for model function calls.
//!
//! `end_call` is handled in-process: it asks the bridge to hang up once the
//! model has finished speaking. Every other tool is delegated to an optional
//! fallback registry, normally a [`WebhookToolRegistry`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::core::realtime::ToolDefinition;
use crate::utils::url_validation::{UrlValidationError, validate_webhook_url};

/// Name of the built-in hangup tool.
pub const END_CALL_TOOL: &str = "end_call";

/// One function call from the model, with the call it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub call_identifier: String,
    pub agent_id: String,
    pub workspace_id: Option<String>,
}

/// Side effect a tool asks the bridge to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolAction {
    EndCall {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Returned to the model as the function call output.
    pub output: Value,
    pub action: Option<ToolAction>,
}

impl ToolOutcome {
    pub fn output(output: Value) -> Self {
        Self {
            output,
            action: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Failed(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    /// Output sent back to the model in place of a result.
    pub fn to_output(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError>;
}

/// Run a tool under a deadline.
pub async fn invoke_with_timeout(
    registry: &dyn ToolRegistry,
    invocation: ToolInvocation,
    timeout: Duration,
) -> Result<ToolOutcome, ToolError> {
    tokio::time::timeout(timeout, registry.invoke(invocation))
        .await
        .map_err(|_| ToolError::Timeout(timeout))?
}

// =============================================================================
// Built-in tools
// =============================================================================

/// Handles `end_call` and forwards everything else.
#[derive(Default, Clone)]
pub struct BuiltinToolRegistry {
    fallback: Option<Arc<dyn ToolRegistry>>,
}

impl BuiltinToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Arc<dyn ToolRegistry>) -> Self {
        Self {
            fallback: Some(fallback),
        }
    }

    /// Schema announced to the model for `end_call`.
    pub fn end_call_definition() -> ToolDefinition {
        ToolDefinition {
            name: END_CALL_TOOL.to_string(),
            description: Some(
                "End the phone call. Use after saying goodbye or when the caller asks to hang up."
                    .to_string(),
            ),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Short reason the call is ending"
                    }
                }
            })),
        }
    }
}

#[async_trait]
impl ToolRegistry for BuiltinToolRegistry {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
        if invocation.name == END_CALL_TOOL {
            let reason = invocation
                .arguments
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            tracing::info!(
                call_id = %invocation.call_identifier,
                reason = reason.as_deref().unwrap_or(""),
                "Agent requested hangup"
            );
            return Ok(ToolOutcome {
                output: json!({ "status": "ending_call" }),
                action: Some(ToolAction::EndCall { reason }),
            });
        }

        match &self.fallback {
            Some(fallback) => fallback.invoke(invocation).await,
            None => Err(ToolError::NotFound(invocation.name)),
        }
    }
}

// =============================================================================
// Webhook tools
// =============================================================================

#[derive(Debug, Deserialize)]
struct WebhookToolResponse {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    action: Option<ToolAction>,
}

/// Forwards tool calls as JSON POSTs.
///
/// The request body is the [`ToolInvocation`]. A 2xx reply with
/// `{"output": ..., "action": ...}` is a result; 404 means the tool is not
/// known; any other status is a failure.
#[derive(Debug, Clone)]
pub struct WebhookToolRegistry {
    url: Url,
    client: reqwest::Client,
}

impl WebhookToolRegistry {
    pub fn new(url: &str, allow_local: bool) -> Result<Self, UrlValidationError> {
        let url = validate_webhook_url(url, allow_local)?;
        Ok(Self {
            url,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ToolRegistry for WebhookToolRegistry {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
        tracing::debug!(
            tool = %invocation.name,
            call_id = %invocation.call_identifier,
            "Invoking webhook tool"
        );

        let response = self
            .client
            .post(self.url.clone())
            .json(&invocation)
            .send()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(invocation.name));
        }
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::InvalidArguments(body));
        }
        if !status.is_success() {
            return Err(ToolError::Failed(format!("webhook returned {status}")));
        }

        let body: WebhookToolResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("invalid webhook response: {e}")))?;
        Ok(ToolOutcome {
            output: body.output,
            action: body.action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn invocation(name: &str, arguments: Value) -> ToolInvocation {
        ToolInvocation {
            call_id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
            call_identifier: "v3:call".to_string(),
            agent_id: "front-desk".to_string(),
            workspace_id: None,
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolRegistry for SlowTool {
        async fn invoke(&self, _invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutcome::output(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_end_call_arms_hangup() {
        let outcome = BuiltinToolRegistry::new()
            .invoke(invocation("end_call", json!({"reason": "caller said bye"})))
            .await
            .unwrap();
        assert_eq!(
            outcome.action,
            Some(ToolAction::EndCall {
                reason: Some("caller said bye".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_without_fallback() {
        let err = BuiltinToolRegistry::new()
            .invoke(invocation("lookup", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "lookup"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = invoke_with_timeout(
            &SlowTool,
            invocation("slow", json!({})),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
        assert!(err.to_output()["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn test_end_call_definition() {
        let definition = BuiltinToolRegistry::end_call_definition();
        assert_eq!(definition.name, END_CALL_TOOL);
        assert_eq!(definition.parameters.unwrap()["type"], "object");
    }

    #[test]
    fn test_webhook_url_is_validated() {
        assert!(WebhookToolRegistry::new("http://tools.example.com/invoke", false).is_err());
        assert!(WebhookToolRegistry::new("http://127.0.0.1:9/invoke", true).is_ok());
    }

    #[tokio::test]
    async fn test_webhook_tool_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools"))
            .and(body_partial_json(json!({"name": "book_appointment", "call_id": "call_1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": {"booked": true}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let registry = WebhookToolRegistry::new(&format!("{}/tools", server.uri()), true).unwrap();
        let fallback: Arc<dyn ToolRegistry> = Arc::new(registry);
        let outcome = BuiltinToolRegistry::with_fallback(fallback)
            .invoke(invocation("book_appointment", json!({"time": "10:00"})))
            .await
            .unwrap();
        assert_eq!(outcome.output, json!({"booked": true}));
        assert!(outcome.action.is_none());
    }

    #[tokio::test]
    async fn test_webhook_tool_can_end_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": "transferred",
                "action": {"type": "end_call", "reason": "transfer"}
            })))
            .mount(&server)
            .await;

        let registry = WebhookToolRegistry::new(&server.uri(), true).unwrap();
        let outcome = registry
            .invoke(invocation("transfer", json!({})))
            .await
            .unwrap();
        assert_eq!(
            outcome.action,
            Some(ToolAction::EndCall {
                reason: Some("transfer".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_webhook_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let missing = WebhookToolRegistry::new(&format!("{}/missing", server.uri()), true).unwrap();
        assert!(matches!(
            missing.invoke(invocation("x", json!({}))).await,
            Err(ToolError::NotFound(_))
        ));

        let broken = WebhookToolRegistry::new(&format!("{}/broken", server.uri()), true).unwrap();
        assert!(matches!(
            broken.invoke(invocation("x", json!({}))).await,
            Err(ToolError::Failed(_))
        ));
    }
}
