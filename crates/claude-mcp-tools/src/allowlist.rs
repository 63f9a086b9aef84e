//! Prefix allowlist for the raw-command tool.
//!
//! The comparison runs against the raw command string, pipes and
//! redirections included. This is a conservative hint for well-behaved
//! callers, not a security sandbox; `ALLOW_ALL_COMMANDS` disables it
//! entirely.

use std::path::Path;

use claude_mcp_core::ServerConfig;

/// Built-in prefixes: read-only inspection commands plus read-only git
/// subcommands. Overridden wholesale by `ALLOWED_COMMANDS`.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "pwd", "echo", "wc", "which", "env", "ps", "df",
    "du", "uname", "whoami", "date", "git status", "git log", "git diff", "git show", "git branch",
];

#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    prefixes: Vec<String>,
    allow_all: bool,
}

impl CommandAllowlist {
    pub fn new(prefixes: Vec<String>, allow_all: bool) -> Self {
        Self {
            prefixes,
            allow_all,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let prefixes = match &config.allowed_commands {
            Some(overrides) => overrides
                .iter()
                .map(|prefix| prefix.trim().to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
            None => DEFAULT_ALLOWED_PREFIXES
                .iter()
                .map(|prefix| (*prefix).to_string())
                .collect(),
        };
        Self::new(prefixes, config.allow_all_commands)
    }

    /// Byte-exact, case-sensitive prefix match after trimming leading
    /// whitespace.
    pub fn is_allowed(&self, command: &str) -> bool {
        if self.allow_all {
            return true;
        }
        let trimmed = command.trim_start();
        self.prefixes
            .iter()
            .any(|prefix| trimmed.starts_with(prefix.as_str()))
    }

    /// Human-readable denial naming the parsed executable and the accepted
    /// prefixes.
    pub fn denial_text(&self, command: &str) -> String {
        let executable =
            leading_executable(command).unwrap_or_else(|| command.trim().to_string());
        format!(
            "Command not allowed: '{executable}'. Allowed prefixes: {}",
            self.prefixes.join(", ")
        )
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

/// First non-assignment token of a command line, reduced to its file name.
pub(crate) fn leading_executable(command: &str) -> Option<String> {
    let tokens = shell_words::split(command).ok()?;
    for token in tokens {
        if is_shell_assignment(&token) {
            continue;
        }
        return Some(
            Path::new(&token)
                .file_name()
                .map(|file_name| file_name.to_string_lossy().to_string())
                .unwrap_or(token),
        );
    }
    None
}

fn is_shell_assignment(token: &str) -> bool {
    let Some((name, _value)) = token.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return false;
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}
