//! Public facade over the session store and process runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::runner::{self, CommandSpec, SpawnOutcome, SpawnRequest};
use crate::store::{ActiveSessionInfo, SessionMetadata, SessionStore, StoreLimits};

/// Literal returned by [`SessionManager::read_new`] when an active session
/// has nothing buffered; part of the external interface.
pub const NO_NEW_OUTPUT: &str = "No new output available";

#[derive(Debug, Clone)]
pub struct SessionManager {
    store: SessionStore,
    config: Arc<ServerConfig>,
}

impl SessionManager {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let store = SessionStore::new(StoreLimits {
            max_completed: config.max_completed,
            max_age: config.max_age,
            max_buf_bytes: config.max_buf_bytes,
        });
        Self { store, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn execute(&self, request: SpawnRequest) -> SpawnOutcome {
        runner::spawn_session(&self.store, request).await
    }

    /// Raw-command entry point: runs `command_line` under a shell and waits
    /// up to `initial_wait` before handing back a (possibly blocked) handle.
    pub async fn execute_shell(
        &self,
        command_line: String,
        shell: Option<String>,
        cwd: Option<PathBuf>,
        initial_wait: Duration,
    ) -> SpawnOutcome {
        let mut request = SpawnRequest::new(
            CommandSpec::Shell {
                command_line,
                shell,
            },
            initial_wait,
        );
        request.cwd = cwd;
        self.execute(request).await
    }

    /// Drains new output for an active session, formats the completion
    /// block for a finalized one, and returns `None` for unknown pids.
    pub fn read_new(&self, pid: i32) -> Option<String> {
        if let Some(drained) = self.store.drain_active(pid) {
            if drained.is_empty() {
                return Some(NO_NEW_OUTPUT.to_string());
            }
            return Some(drained);
        }
        self.store.completed_summary(pid).map(|summary| {
            format!(
                "Process completed with exit code {}\nRuntime: {:.1}s\nFinal output:\n{}",
                summary.exit_code, summary.runtime_secs, summary.full_output
            )
        })
    }

    pub fn terminate(&self, pid: i32) -> bool {
        runner::terminate(&self.store, pid, self.config.sigterm_grace)
    }

    pub fn list_active(&self) -> Vec<ActiveSessionInfo> {
        self.store.list_active()
    }

    pub fn is_active(&self, pid: i32) -> bool {
        self.store.is_active(pid)
    }

    pub fn active_metadata(&self, pid: i32) -> Option<SessionMetadata> {
        self.store.active_metadata(pid)
    }

    pub fn completed_exit_code(&self, pid: i32) -> Option<i32> {
        self.store.completed_exit_code(pid)
    }

    /// Periodic pass: ages out completed sessions and force-terminates
    /// active sessions that outlived the hard age cap.
    pub fn sweep(&self) {
        for pid in self.store.sweep(Instant::now()) {
            tracing::warn!(pid, "terminating session past the hard active age");
            self.terminate(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(ServerConfig::default()))
    }

    #[tokio::test]
    async fn unit_read_new_unknown_pid_is_none() {
        assert!(manager().read_new(424242).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_read_new_empty_drain_returns_the_literal() {
        let manager = manager();
        let outcome = manager
            .execute_shell(
                "echo once; sleep 5".to_string(),
                Some("/bin/sh".to_string()),
                None,
                Duration::from_millis(200),
            )
            .await;
        assert!(outcome.is_blocked);
        // The initial wait already drained "once\n".
        assert_eq!(manager.read_new(outcome.pid).as_deref(), Some(NO_NEW_OUTPUT));
        manager.terminate(outcome.pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_read_new_completed_session_formats_the_block() {
        let manager = manager();
        let outcome = manager
            .execute_shell(
                "printf \"payload\"; exit 3".to_string(),
                Some("/bin/sh".to_string()),
                None,
                Duration::from_secs(5),
            )
            .await;
        assert!(!outcome.is_blocked);

        let block = manager.read_new(outcome.pid).expect("completed block");
        assert!(block.starts_with("Process completed with exit code 3\nRuntime: "));
        assert!(block.contains("s\nFinal output:\npayload"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_list_active_reports_blocked_flag_and_runtime() {
        let manager = manager();
        let outcome = manager
            .execute_shell(
                "sleep 5".to_string(),
                Some("/bin/sh".to_string()),
                None,
                Duration::from_millis(100),
            )
            .await;
        assert!(outcome.is_blocked);

        let active = manager.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pid, outcome.pid);
        assert!(active[0].is_blocked);
        manager.terminate(outcome.pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_spawn_failure_is_encoded_not_raised() {
        let manager = manager();
        let outcome = manager
            .execute(SpawnRequest::new(
                CommandSpec::Direct {
                    program: "/nonexistent/missing-cli".to_string(),
                    args: Vec::new(),
                },
                Duration::from_secs(1),
            ))
            .await;
        assert_eq!(outcome.pid, crate::runner::SPAWN_FAILURE_PID);
        assert!(manager.list_active().is_empty());
    }
}
