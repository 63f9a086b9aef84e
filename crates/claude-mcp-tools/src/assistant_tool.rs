//! The assistant tool: one invocation of the Claude Code CLI per call.
//!
//! A thin wrapper over `execute` plus prompt shaping and working-directory
//! resolution. Blocking calls ride the session manager's initial wait and
//! then poll; detached calls hand back a pid for `read_output`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use claude_mcp_core::{CommandSpec, ServerConfig, SessionManager, SpawnOutcome, SpawnRequest,
    SPAWN_FAILURE_PID};

use crate::{optional_bool, optional_string, required_string, ServerTool, ToolDefinition,
    ToolError, ToolReply};

const SKIP_PERMISSIONS_FLAG: &str = "--dangerously-skip-permissions";
const ONE_SHOT_PROMPT_FLAG: &str = "-p";
const DETACHED_INITIAL_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const COMPLETION_SENTINEL: &str = "Process completed with exit code";

/// Keys stripped from the child environment in orchestrator mode so nested
/// invocations do not recurse into orchestrator mode themselves.
const ORCHESTRATOR_ENV_KEYS: &[&str] = &["ORCHESTRATOR_MODE"];

const ORCHESTRATOR_PREAMBLE: &str = "You are running as a sub-agent on behalf of an \
orchestrating agent. Complete the task below autonomously and report the result as plain \
text. Do not ask for confirmation before acting.\n\n";

pub struct AssistantTool {
    manager: SessionManager,
    config: Arc<ServerConfig>,
    started_wall: DateTime<Utc>,
    banner_emitted: AtomicBool,
}

impl AssistantTool {
    pub fn new(manager: SessionManager, config: Arc<ServerConfig>) -> Self {
        Self {
            manager,
            config,
            started_wall: Utc::now(),
            banner_emitted: AtomicBool::new(false),
        }
    }

    async fn blocking_reply(&self, outcome: SpawnOutcome) -> Result<ToolReply, ToolError> {
        if !outcome.is_blocked {
            return Ok(ToolReply::ok(outcome.output));
        }

        let pid = outcome.pid;
        let mut fragments = outcome.output;
        let deadline = Instant::now() + self.config.default_assistant_timeout;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.manager.read_new(pid) {
                Some(text) if text.contains(COMPLETION_SENTINEL) => {
                    return Ok(ToolReply::ok(text));
                }
                Some(text) => {
                    if text != claude_mcp_core::manager::NO_NEW_OUTPUT {
                        fragments.push_str(&text);
                    }
                }
                // Session evicted from the store without a readable
                // completion block; hand back what was collected.
                None => return Ok(ToolReply::ok(fragments)),
            }
            if Instant::now() >= deadline {
                let timeout_secs = self.config.default_assistant_timeout.as_secs();
                return Err(ToolError::Internal(format!(
                    "Claude Code run timed out after {timeout_secs}s; collected output:\n{fragments}"
                )));
            }
        }
    }

    fn detached_reply(&self, outcome: SpawnOutcome) -> ToolReply {
        let pid = outcome.pid;
        let metadata = self.manager.active_metadata(pid);
        let is_running = metadata.is_some();
        let start_time = metadata
            .map(|meta| meta.started_wall)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let text = format!(
            "Claude Code task started with PID {pid}\n\nInitial output:\n{}\n\nUse the \
             read_output tool with this PID to retrieve additional output.",
            outcome.output
        );
        ToolReply::ok(text).with_metadata(json!({
            "pid": pid,
            "isRunning": is_running,
            "startTime": start_time,
        }))
    }

    fn emit_banner_once(&self) {
        if !self.banner_emitted.swap(true, Ordering::SeqCst) {
            eprintln!(
                "claude-mcp-server v{} (started {})",
                env!("CARGO_PKG_VERSION"),
                self.started_wall.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
    }
}

#[async_trait]
impl ServerTool for AssistantTool {
    fn definition(&self) -> ToolDefinition {
        let mut description = "Run a prompt through the Claude Code CLI in a one-shot \
                               session. Blocks for the result by default; pass wait=false \
                               to get a PID handle for polling with read_output."
            .to_string();
        if self.config.orchestrator_mode {
            description.push_str(
                " Runs as an orchestrator sub-agent: a task preamble is prepended and \
                 nested orchestration is disabled.",
            );
        }
        ToolDefinition {
            name: "assistant".to_string(),
            description,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Task for the Claude Code CLI" },
                    "workFolder": { "type": "string", "description": "Working directory; falls back to the home directory when absent or invalid" },
                    "wait": { "type": "boolean", "description": "Set false to detach and poll with read_output" }
                },
                "required": ["prompt"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolReply, ToolError> {
        let prompt = required_string(&arguments, "prompt")?;
        let work_folder = optional_string(&arguments, "workFolder")?;
        let wait = optional_bool(&arguments, "wait", true)?;

        let cwd = resolve_work_folder(work_folder.as_deref());
        let prompt = if self.config.orchestrator_mode {
            format!("{ORCHESTRATOR_PREAMBLE}{prompt}")
        } else {
            prompt
        };

        let mut request = SpawnRequest::new(
            CommandSpec::Direct {
                program: self.config.assistant_binary.clone(),
                args: vec![
                    SKIP_PERMISSIONS_FLAG.to_string(),
                    ONE_SHOT_PROMPT_FLAG.to_string(),
                    prompt,
                ],
            },
            if wait {
                self.config.default_assistant_timeout
            } else {
                DETACHED_INITIAL_WAIT
            },
        );
        request.cwd = Some(cwd);
        if self.config.orchestrator_mode {
            request.env_remove = ORCHESTRATOR_ENV_KEYS
                .iter()
                .map(|key| (*key).to_string())
                .collect();
            request
                .env_set
                .push(("DEBUG".to_string(), "false".to_string()));
        }

        let outcome = self.manager.execute(request).await;
        if outcome.pid == SPAWN_FAILURE_PID {
            return Err(ToolError::Internal(format!(
                "Failed to start the Claude Code CLI: {}",
                outcome.output
            )));
        }

        let reply = if wait {
            self.blocking_reply(outcome).await?
        } else {
            self.detached_reply(outcome)
        };
        self.emit_banner_once();
        Ok(reply)
    }
}

fn resolve_work_folder(requested: Option<&str>) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    match requested {
        None => home(),
        Some(raw) => {
            let path = PathBuf::from(raw);
            if path.is_dir() {
                tracing::warn!(path = %path.display(), "assistant running outside the default work folder");
                path
            } else {
                let fallback = home();
                tracing::warn!(
                    requested = raw,
                    fallback = %fallback.display(),
                    "requested work folder does not exist; falling back to home directory"
                );
                fallback
            }
        }
    }
}
