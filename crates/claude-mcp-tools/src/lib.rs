//! Tool surface of the Claude MCP server: the tool trait, reply shaping,
//! argument extraction, and the five tool implementations.

pub mod allowlist;
pub mod assistant_tool;
pub mod registry;
pub mod terminal_tools;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

pub use allowlist::CommandAllowlist;
pub use registry::{DispatchError, ToolRegistry};

/// Catalog entry returned by `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool reply before wire shaping: text body, error flag, open metadata.
#[derive(Debug, Clone)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

impl ToolReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Shapes the reply into the wire object:
    /// `{content: [{type: "text", text}], isError?, metadata?}`.
    pub fn render(&self) -> Value {
        let mut frame = serde_json::Map::new();
        frame.insert(
            "content".to_string(),
            json!([{ "type": "text", "text": self.text }]),
        );
        if self.is_error {
            frame.insert("isError".to_string(), json!(true));
        }
        if let Some(metadata) = &self.metadata {
            frame.insert("metadata".to_string(), metadata.clone());
        }
        Value::Object(frame)
    }
}

/// Failures that escape a tool as protocol errors rather than `isError`
/// replies. Policy denials and lifecycle misses are replies, not errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0}")]
    Internal(String),
}

#[async_trait]
pub trait ServerTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> Result<ToolReply, ToolError>;
}

pub(crate) fn required_string(arguments: &Value, field: &str) -> Result<String, ToolError> {
    match arguments.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(ToolError::InvalidParams(format!(
            "field '{field}' must be a non-empty string"
        ))),
        Some(_) => Err(ToolError::InvalidParams(format!(
            "field '{field}' must be a string"
        ))),
        None => Err(ToolError::InvalidParams(format!(
            "missing required field '{field}'"
        ))),
    }
}

pub(crate) fn optional_string(arguments: &Value, field: &str) -> Result<Option<String>, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ToolError::InvalidParams(format!(
            "field '{field}' must be a string"
        ))),
    }
}

pub(crate) fn optional_bool(
    arguments: &Value,
    field: &str,
    default: bool,
) -> Result<bool, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => Err(ToolError::InvalidParams(format!(
            "field '{field}' must be a boolean"
        ))),
    }
}

pub(crate) fn optional_u64(arguments: &Value, field: &str) -> Result<Option<u64>, ToolError> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ToolError::InvalidParams(format!("field '{field}' must be a non-negative integer"))
        }),
    }
}

pub(crate) fn required_pid(arguments: &Value, field: &str) -> Result<i32, ToolError> {
    match arguments.get(field) {
        None => Err(ToolError::InvalidParams(format!(
            "missing required field '{field}'"
        ))),
        Some(value) => value
            .as_i64()
            .and_then(|raw| i32::try_from(raw).ok())
            .ok_or_else(|| {
                ToolError::InvalidParams(format!("field '{field}' must be an integer pid"))
            }),
    }
}
