//! Line-delimited JSON-RPC loop over stdio.
//!
//! One request per line in, one reply per line out, flushed per frame. A
//! malformed line produces an error frame and the loop keeps going; only
//! stdin EOF or a shutdown signal ends it.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use claude_mcp_tools::registry::{
    DispatchError, ToolRegistry, ERROR_INVALID_REQUEST, ERROR_METHOD_NOT_FOUND, ERROR_PARSE,
};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "claude-mcp-server";

#[derive(Debug, Clone)]
pub struct ServeReport {
    pub processed_frames: usize,
    pub error_count: usize,
}

/// Lenient envelope: field problems are reported per-frame, not by serde.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

struct RpcRequest {
    id: Value,
    method: String,
    params: Map<String, Value>,
}

struct RpcError {
    id: Value,
    code: i64,
    message: String,
}

impl RpcError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

pub async fn serve<R, W>(reader: R, writer: &mut W, registry: &ToolRegistry) -> Result<ServeReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut processed_frames = 0usize;
    let mut error_count = 0usize;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        processed_frames = processed_frames.saturating_add(1);

        let frame = match serde_json::from_str::<RawFrame>(trimmed) {
            Ok(frame) => frame,
            Err(error) => {
                error_count = error_count.saturating_add(1);
                let response = error_frame(
                    Value::Null,
                    ERROR_PARSE,
                    format!("failed to parse request line: {error}"),
                );
                write_frame(writer, &response).await?;
                continue;
            }
        };

        // A frame without an id is a notification; consume it silently.
        if frame.id.is_none() {
            tracing::debug!(method = frame.method.as_deref().unwrap_or("<none>"), "notification consumed");
            continue;
        }

        let response = match parse_request(frame) {
            Ok(request) => {
                let id = request.id.clone();
                match dispatch(registry, request).await {
                    Ok(result) => result_frame(id, result),
                    Err(error) => {
                        error_count = error_count.saturating_add(1);
                        error_frame(id, error.code, error.message)
                    }
                }
            }
            Err(error) => {
                error_count = error_count.saturating_add(1);
                error_frame(error.id, error.code, error.message)
            }
        };
        write_frame(writer, &response).await?;
    }

    Ok(ServeReport {
        processed_frames,
        error_count,
    })
}

fn parse_request(frame: RawFrame) -> Result<RpcRequest, RpcError> {
    let id = frame.id.unwrap_or(Value::Null);
    if let Some(version) = &frame.jsonrpc {
        if version != JSONRPC_VERSION {
            return Err(RpcError::new(
                id,
                ERROR_INVALID_REQUEST,
                format!("jsonrpc must be '{JSONRPC_VERSION}' when present"),
            ));
        }
    }
    let method = match frame.method {
        Some(method) if !method.trim().is_empty() => method.trim().to_string(),
        _ => {
            return Err(RpcError::new(
                id,
                ERROR_INVALID_REQUEST,
                "request must include a non-empty method",
            ));
        }
    };
    let params = match frame.params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params,
        Some(_) => {
            return Err(RpcError::new(
                id,
                ERROR_INVALID_REQUEST,
                "request params must be an object",
            ));
        }
    };
    Ok(RpcRequest { id, method, params })
}

async fn dispatch(registry: &ToolRegistry, request: RpcRequest) -> Result<Value, DispatchError> {
    match request.method.as_str() {
        "initialize" => Ok(initialize_payload()),
        "tools/list" => Ok(registry.catalog()),
        "tools/call" => {
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    DispatchError::invalid_params("tools/call requires non-empty field 'name'")
                })?;
            let arguments = match request.params.get("arguments") {
                Some(Value::Object(arguments)) => Value::Object(arguments.clone()),
                None | Some(Value::Null) => Value::Object(Map::new()),
                Some(_) => {
                    return Err(DispatchError::invalid_params(
                        "tools/call field 'arguments' must be an object when provided",
                    ));
                }
            };
            let reply = registry.call(name, arguments).await?;
            Ok(reply.render())
        }
        other => Err(DispatchError {
            code: ERROR_METHOD_NOT_FOUND,
            message: format!("unsupported method '{other}'"),
        }),
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn result_frame(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

fn error_frame(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": { "code": code, "message": message } })
}

async fn write_frame<W>(writer: &mut W, frame: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(frame).context("failed to encode response frame")?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
