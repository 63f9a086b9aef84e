//! Tool registry: catalog for `tools/list` and dispatch for `tools/call`.

use std::sync::Arc;

use serde_json::{json, Value};

use claude_mcp_core::{ServerConfig, SessionManager};

use crate::allowlist::CommandAllowlist;
use crate::assistant_tool::AssistantTool;
use crate::terminal_tools::{
    ExecuteCommandTool, ForceTerminateTool, ListSessionsTool, ReadOutputTool,
};
use crate::{ServerTool, ToolError, ToolReply};

pub const ERROR_PARSE: i64 = -32700;
pub const ERROR_INVALID_REQUEST: i64 = -32600;
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERROR_INVALID_PARAMS: i64 = -32602;
pub const ERROR_INTERNAL: i64 = -32603;

/// A protocol-level failure: JSON-RPC error code plus message.
#[derive(Debug, Clone)]
pub struct DispatchError {
    pub code: i64,
    pub message: String,
}

impl DispatchError {
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self {
            code: ERROR_METHOD_NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: ERROR_INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ERROR_INTERNAL,
            message: message.into(),
        }
    }
}

impl From<ToolError> for DispatchError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::InvalidParams(message) => DispatchError::invalid_params(message),
            ToolError::Internal(message) => DispatchError::internal(message),
        }
    }
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn ServerTool>>,
}

impl ToolRegistry {
    pub fn new(manager: SessionManager, config: Arc<ServerConfig>) -> Self {
        let allowlist = CommandAllowlist::from_config(&config);
        let tools: Vec<Arc<dyn ServerTool>> = vec![
            Arc::new(AssistantTool::new(manager.clone(), config.clone())),
            Arc::new(ExecuteCommandTool::new(
                manager.clone(),
                allowlist,
                config.clone(),
            )),
            Arc::new(ReadOutputTool::new(manager.clone())),
            Arc::new(ForceTerminateTool::new(manager.clone())),
            Arc::new(ListSessionsTool::new(manager)),
        ];
        Self { tools }
    }

    /// `tools/list` payload.
    pub fn catalog(&self) -> Value {
        json!({
            "tools": self
                .tools
                .iter()
                .map(|tool| {
                    let definition = tool.definition();
                    json!({
                        "name": definition.name,
                        "description": definition.description,
                        "inputSchema": definition.input_schema,
                    })
                })
                .collect::<Vec<_>>()
        })
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolReply, DispatchError> {
        let Some(tool) = self
            .tools
            .iter()
            .find(|tool| tool.definition().name == name)
        else {
            return Err(DispatchError::method_not_found(format!(
                "Tool {name} not found"
            )));
        };
        tool.execute(arguments).await.map_err(DispatchError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let config = Arc::new(ServerConfig::default());
        ToolRegistry::new(SessionManager::new(config.clone()), config)
    }

    #[test]
    fn unit_catalog_lists_the_five_tools() {
        let catalog = registry().catalog();
        let names = catalog["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .map(|tool| tool["name"].as_str().expect("name").to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "assistant",
                "execute_command",
                "read_output",
                "force_terminate",
                "list_sessions"
            ]
        );
        for tool in catalog["tools"].as_array().expect("tools array") {
            assert!(tool["inputSchema"]["type"] == "object");
            assert!(tool["description"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn unit_unknown_tool_maps_to_method_not_found() {
        let error = registry()
            .call("nope", json!({}))
            .await
            .expect_err("must be unknown");
        assert_eq!(error.code, ERROR_METHOD_NOT_FOUND);
        assert_eq!(error.message, "Tool nope not found");
    }

    #[tokio::test]
    async fn unit_validation_failures_map_to_invalid_params() {
        let error = registry()
            .call("read_output", json!({}))
            .await
            .expect_err("missing pid");
        assert_eq!(error.code, ERROR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn functional_policy_denial_is_a_reply_not_a_protocol_error() {
        let reply = registry()
            .call("execute_command", json!({ "command": "rm -rf /" }))
            .await
            .expect("reply");
        assert!(reply.is_error);
        assert!(reply.text.contains("Command not allowed"));
    }
}
