//! Terminal-session tools: run a raw command, poll output, terminate,
//! list. Policy denials and lifecycle misses surface as `isError` replies,
//! never as protocol errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use claude_mcp_core::{ServerConfig, SessionManager, SPAWN_FAILURE_PID};

use crate::allowlist::CommandAllowlist;
use crate::{
    optional_bool, optional_string, optional_u64, required_pid, required_string, ServerTool,
    ToolDefinition, ToolError, ToolReply,
};

pub struct ExecuteCommandTool {
    manager: SessionManager,
    allowlist: CommandAllowlist,
    config: Arc<ServerConfig>,
}

impl ExecuteCommandTool {
    pub fn new(
        manager: SessionManager,
        allowlist: CommandAllowlist,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            manager,
            allowlist,
            config,
        }
    }
}

#[async_trait]
impl ServerTool for ExecuteCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_command".to_string(),
            description: "Execute a terminal command as a tracked session. Waits up to \
                          timeout_ms for completion; a still-running command returns a PID \
                          handle for read_output and force_terminate."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command line to run under the shell" },
                    "timeout_ms": { "type": "integer", "description": "Initial wait in milliseconds before returning a handle" },
                    "shell": { "type": "string", "description": "Shell binary to use instead of $SHELL" },
                    "cwd": { "type": "string", "description": "Working directory for the command" },
                    "wait": { "type": "boolean", "description": "Set false to return a handle immediately" }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolReply, ToolError> {
        let command = required_string(&arguments, "command")?;
        if !self.allowlist.is_allowed(&command) {
            return Ok(ToolReply::error(self.allowlist.denial_text(&command)));
        }

        let timeout_ms = optional_u64(&arguments, "timeout_ms")?
            .unwrap_or(self.config.default_cmd_timeout.as_millis() as u64);
        let shell = optional_string(&arguments, "shell")?;
        let cwd = optional_string(&arguments, "cwd")?.map(PathBuf::from);
        let wait = optional_bool(&arguments, "wait", true)?;
        let initial_wait = if wait {
            Duration::from_millis(timeout_ms)
        } else {
            Duration::ZERO
        };

        let outcome = self
            .manager
            .execute_shell(command, shell, cwd, initial_wait)
            .await;

        if outcome.pid == SPAWN_FAILURE_PID {
            return Ok(ToolReply::error(outcome.output));
        }
        if outcome.is_blocked {
            let text = format!(
                "Command started with PID {}\nInitial output:\n{}\n\nUse read_output to \
                 retrieve new output and force_terminate to stop the session.",
                outcome.pid, outcome.output
            );
            return Ok(ToolReply::ok(text)
                .with_metadata(json!({ "pid": outcome.pid, "isRunning": true })));
        }
        Ok(ToolReply::ok(outcome.output)
            .with_metadata(json!({ "pid": outcome.pid, "isRunning": false })))
    }
}

pub struct ReadOutputTool {
    manager: SessionManager,
}

impl ReadOutputTool {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ServerTool for ReadOutputTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_output".to_string(),
            description: "Read new output from a tracked session. Running sessions drain \
                          their buffer; completed sessions return the final summary block."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pid": { "type": "integer", "description": "Process id returned by execute_command or the assistant tool" }
                },
                "required": ["pid"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolReply, ToolError> {
        let pid = required_pid(&arguments, "pid")?;
        let Some(text) = self.manager.read_new(pid) else {
            return Ok(ToolReply::error(format!("No session found for PID {pid}")));
        };
        let metadata = match self.manager.active_metadata(pid) {
            Some(meta) => json!({
                "pid": pid,
                "isRunning": true,
                "runtime": meta.runtime_ms / 1000,
            }),
            None => {
                let mut meta = json!({ "pid": pid, "isRunning": false });
                if let Some(exit_code) = self.manager.completed_exit_code(pid) {
                    meta["exitCode"] = json!(exit_code);
                }
                meta
            }
        };
        Ok(ToolReply::ok(text).with_metadata(metadata))
    }
}

pub struct ForceTerminateTool {
    manager: SessionManager,
}

impl ForceTerminateTool {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ServerTool for ForceTerminateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "force_terminate".to_string(),
            description: "Stop a tracked session: cooperative signal first, forceful kill \
                          after the grace period."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pid": { "type": "integer", "description": "Process id of the session to stop" }
                },
                "required": ["pid"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolReply, ToolError> {
        let pid = required_pid(&arguments, "pid")?;
        if self.manager.terminate(pid) {
            Ok(
                ToolReply::ok(format!("Successfully initiated termination of session {pid}"))
                    .with_metadata(json!({ "pid": pid, "isRunning": false })),
            )
        } else {
            Ok(
                ToolReply::error(format!("No active session found for PID {pid}"))
                    .with_metadata(json!({ "pid": pid, "isRunning": false })),
            )
        }
    }
}

pub struct ListSessionsTool {
    manager: SessionManager,
}

impl ListSessionsTool {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ServerTool for ListSessionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_sessions".to_string(),
            description: "List active sessions with their pid, state, and runtime.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolReply, ToolError> {
        let sessions = self.manager.list_active();
        if sessions.is_empty() {
            return Ok(ToolReply::ok("No active sessions"));
        }
        let lines = sessions
            .iter()
            .map(|session| {
                format!(
                    "PID {}: {}, runtime {:.1}s",
                    session.pid,
                    if session.is_blocked { "blocked" } else { "running" },
                    session.runtime_ms as f64 / 1000.0
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolReply::ok(format!("Active sessions:\n{lines}")))
    }
}
