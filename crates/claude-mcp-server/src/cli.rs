//! Startup configuration surface: every tuning key is a long flag backed by
//! the environment variable of the same concern, read once at startup.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use claude_mcp_core::config::{
    ServerConfig, DEFAULT_ASSISTANT_BINARY, DEFAULT_ASSISTANT_TIMEOUT_MS, DEFAULT_CMD_TIMEOUT_MS,
    DEFAULT_MAX_AGE_MS, DEFAULT_MAX_BUF_BYTES, DEFAULT_MAX_COMPLETED, DEFAULT_SIGTERM_GRACE_MS,
    DEFAULT_SWEEP_INTERVAL_MS,
};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "claude-mcp-server",
    about = "MCP server exposing the Claude Code CLI and tracked terminal sessions over stdio",
    version
)]
pub struct Cli {
    #[arg(
        long = "assistant-binary",
        env = "ASSISTANT_BINARY_NAME",
        default_value = DEFAULT_ASSISTANT_BINARY,
        help = "Claude CLI to invoke: a bare command name resolved on PATH or an absolute path. Relative paths are rejected."
    )]
    pub assistant_binary: String,

    #[arg(
        long = "default-cmd-timeout-ms",
        env = "DEFAULT_CMD_TIMEOUT_MS",
        default_value_t = DEFAULT_CMD_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Default initial wait for execute_command before it returns a PID handle"
    )]
    pub default_cmd_timeout_ms: u64,

    #[arg(
        long = "default-assistant-timeout-ms",
        env = "DEFAULT_ASSISTANT_TIMEOUT_MS",
        default_value_t = DEFAULT_ASSISTANT_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Default initial wait for blocking assistant calls"
    )]
    pub default_assistant_timeout_ms: u64,

    #[arg(
        long = "max-completed",
        env = "MAX_COMPLETED",
        default_value_t = DEFAULT_MAX_COMPLETED,
        value_parser = parse_positive_usize,
        help = "Completed sessions retained before FIFO eviction"
    )]
    pub max_completed: usize,

    #[arg(
        long = "max-age-ms",
        env = "MAX_AGE_MS",
        default_value_t = DEFAULT_MAX_AGE_MS,
        value_parser = parse_positive_u64,
        help = "Completed-session TTL enforced by the sweep pass"
    )]
    pub max_age_ms: u64,

    #[arg(
        long = "sigterm-grace-ms",
        env = "SIGTERM_GRACE_MS",
        default_value_t = DEFAULT_SIGTERM_GRACE_MS,
        value_parser = parse_positive_u64,
        help = "Grace between the cooperative stop signal and the forceful kill"
    )]
    pub sigterm_grace_ms: u64,

    #[arg(
        long = "sweep-interval-ms",
        env = "SWEEP_INTERVAL_MS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_MS,
        value_parser = parse_positive_u64,
        help = "Period of the background sweep timer"
    )]
    pub sweep_interval_ms: u64,

    #[arg(
        long = "max-buf",
        env = "MAX_BUF",
        default_value_t = DEFAULT_MAX_BUF_BYTES,
        value_parser = parse_positive_usize,
        help = "Per-session output byte cap; older output is discarded with a truncation notice"
    )]
    pub max_buf_bytes: usize,

    #[arg(
        long = "allowed-commands",
        env = "ALLOWED_COMMANDS",
        value_delimiter = ',',
        help = "Comma-separated command prefixes accepted by execute_command; replaces the built-in list"
    )]
    pub allowed_commands: Vec<String>,

    #[arg(
        long = "allow-all-commands",
        env = "ALLOW_ALL_COMMANDS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Disable the command allowlist entirely"
    )]
    pub allow_all_commands: bool,

    #[arg(
        long = "orchestrator-mode",
        env = "ORCHESTRATOR_MODE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Prepend the orchestrator preamble to assistant prompts and scrub orchestrator env keys from children"
    )]
    pub orchestrator_mode: bool,

    #[arg(
        long = "debug",
        env = "DEBUG",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Enable verbose diagnostic logging on stderr"
    )]
    pub debug: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<ServerConfig> {
        use std::time::Duration;

        let allowed_commands = if self.allowed_commands.is_empty() {
            None
        } else {
            Some(self.allowed_commands)
        };
        let config = ServerConfig {
            default_cmd_timeout: Duration::from_millis(self.default_cmd_timeout_ms),
            default_assistant_timeout: Duration::from_millis(self.default_assistant_timeout_ms),
            max_completed: self.max_completed,
            max_age: Duration::from_millis(self.max_age_ms),
            sigterm_grace: Duration::from_millis(self.sigterm_grace_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            max_buf_bytes: self.max_buf_bytes,
            allowed_commands,
            allow_all_commands: self.allow_all_commands,
            assistant_binary: self.assistant_binary,
            orchestrator_mode: self.orchestrator_mode,
            debug: self.debug,
        };
        config
            .validate()
            .context("invalid assistant binary configuration")?;
        Ok(config)
    }
}
