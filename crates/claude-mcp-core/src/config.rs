//! Process-wide configuration, assembled once at startup.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_CMD_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ASSISTANT_TIMEOUT_MS: u64 = 1_800_000;
pub const DEFAULT_MAX_COMPLETED: usize = 100;
pub const DEFAULT_MAX_AGE_MS: u64 = 3_600_000;
pub const DEFAULT_SIGTERM_GRACE_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 600_000;
pub const DEFAULT_MAX_BUF_BYTES: usize = 1_048_576;
pub const DEFAULT_ASSISTANT_BINARY: &str = "claude";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("assistant binary must be a bare command name or an absolute path, got relative path '{0}'")]
    RelativeAssistantBinary(String),
    #[error("assistant binary must be non-empty")]
    EmptyAssistantBinary,
}

/// Immutable server configuration shared by reference; there is no hot
/// reload and no mutable global besides the session store itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_cmd_timeout: Duration,
    pub default_assistant_timeout: Duration,
    pub max_completed: usize,
    pub max_age: Duration,
    pub sigterm_grace: Duration,
    pub sweep_interval: Duration,
    pub max_buf_bytes: usize,
    /// `None` selects the built-in allowlist.
    pub allowed_commands: Option<Vec<String>>,
    pub allow_all_commands: bool,
    pub assistant_binary: String,
    pub orchestrator_mode: bool,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_cmd_timeout: Duration::from_millis(DEFAULT_CMD_TIMEOUT_MS),
            default_assistant_timeout: Duration::from_millis(DEFAULT_ASSISTANT_TIMEOUT_MS),
            max_completed: DEFAULT_MAX_COMPLETED,
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            sigterm_grace: Duration::from_millis(DEFAULT_SIGTERM_GRACE_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            max_buf_bytes: DEFAULT_MAX_BUF_BYTES,
            allowed_commands: None,
            allow_all_commands: false,
            assistant_binary: DEFAULT_ASSISTANT_BINARY.to_string(),
            orchestrator_mode: false,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Startup validation; a relative assistant binary path is fatal so a
    /// cwd change can never silently retarget the CLI.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_assistant_binary(&self.assistant_binary)
    }
}

pub fn validate_assistant_binary(name: &str) -> Result<(), ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyAssistantBinary);
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Ok(());
    }
    if trimmed.contains(std::path::MAIN_SEPARATOR) {
        return Err(ConfigError::RelativeAssistantBinary(trimmed.to_string()));
    }
    Ok(())
}
