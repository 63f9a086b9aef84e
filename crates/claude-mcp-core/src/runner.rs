//! Spawns child processes and feeds their merged output into the session
//! store.
//!
//! Each spawn starts two reader tasks (stdout, stderr) and one waiter task.
//! The caller's initial wait races a oneshot fired at finalization against
//! a sleep; whichever settles first shapes the immediate outcome while the
//! child keeps running on its own tasks.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::session::{Session, SessionState};
use crate::store::SessionStore;

const READ_CHUNK_SIZE: usize = 8192;
const PREVIEW_MAX_CHARS: usize = 120;

/// Sentinel pid for "spawn failed, no pid assigned"; no session is stored.
pub const SPAWN_FAILURE_PID: i32 = -1;

#[cfg(unix)]
use libc::{SIGKILL, SIGTERM};
#[cfg(not(unix))]
const SIGTERM: i32 = 15;
#[cfg(not(unix))]
const SIGKILL: i32 = 9;

/// How the child is invoked: a raw command line handed to a shell, or a
/// direct program plus argument vector (the assistant CLI path).
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Shell {
        command_line: String,
        shell: Option<String>,
    },
    Direct {
        program: String,
        args: Vec<String>,
    },
}

impl CommandSpec {
    fn resolve(&self) -> (String, Vec<String>) {
        match self {
            CommandSpec::Shell {
                command_line,
                shell,
            } => {
                let program = shell
                    .clone()
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(default_shell);
                (program, vec!["-c".to_string(), command_line.clone()])
            }
            CommandSpec::Direct { program, args } => (program.clone(), args.clone()),
        }
    }

    pub fn preview(&self) -> String {
        let full = match self {
            CommandSpec::Shell { command_line, .. } => command_line.clone(),
            CommandSpec::Direct { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
        };
        clamp_preview(&full)
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

fn clamp_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    let clipped: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{clipped}…")
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub command: CommandSpec,
    pub cwd: Option<PathBuf>,
    /// Environment keys removed from the child (inherits the rest).
    pub env_remove: Vec<String>,
    /// Environment overrides applied after removal.
    pub env_set: Vec<(String, String)>,
    pub initial_wait: Duration,
}

impl SpawnRequest {
    pub fn new(command: CommandSpec, initial_wait: Duration) -> Self {
        Self {
            command,
            cwd: None,
            env_remove: Vec::new(),
            env_set: Vec::new(),
            initial_wait,
        }
    }
}

/// Immediate result of `execute`: a handle plus whatever output arrived
/// before the first settled event. Failure is encoded, never an `Err`.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub pid: i32,
    pub output: String,
    pub is_blocked: bool,
}

impl SpawnOutcome {
    fn spawn_failed(detail: String) -> Self {
        Self {
            pid: SPAWN_FAILURE_PID,
            output: detail,
            is_blocked: false,
        }
    }
}

/// Spawns the child, registers the session, and waits up to
/// `request.initial_wait` for the first of exit / timer.
pub async fn spawn_session(store: &SessionStore, request: SpawnRequest) -> SpawnOutcome {
    let (program, args) = request.command.resolve();
    let mut command = Command::new(&program);
    command.args(&args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }
    for key in &request.env_remove {
        command.env_remove(key);
    }
    for (key, value) in &request.env_set {
        command.env(key, value);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            tracing::warn!(program = %program, "spawn failed: {error}");
            return SpawnOutcome::spawn_failed(format!("Failed to spawn '{program}': {error}"));
        }
    };
    let pid = match child.id() {
        Some(pid) => pid as i32,
        None => {
            let _ = child.start_kill();
            return SpawnOutcome::spawn_failed(format!(
                "Failed to spawn '{program}': no pid assigned"
            ));
        }
    };

    store.insert_active(Session::new(
        pid,
        request.command.preview(),
        store.max_buf_bytes(),
    ));
    tracing::debug!(pid, program = %program, "session started");

    let stdout_task = child
        .stdout
        .take()
        .map(|stream| tokio::spawn(pump_stream(store.clone(), pid, stream)));
    let stderr_task = child
        .stderr
        .take()
        .map(|stream| tokio::spawn(pump_stream(store.clone(), pid, stream)));

    let (exit_tx, exit_rx) = oneshot::channel::<()>();
    let waiter_store = store.clone();
    tokio::spawn(async move {
        let status = child.wait().await;
        // Let the readers capture the tail before finalizing.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        let terminal = match status {
            Ok(status) => SessionState::Completed {
                exit_code: exit_code_of(&status),
            },
            Err(error) => SessionState::Failed {
                reason: format!("wait failed: {error}"),
            },
        };
        tracing::debug!(pid, state = %terminal, "session finalized");
        waiter_store.finalize(pid, terminal);
        let _ = exit_tx.send(());
    });

    tokio::select! {
        _ = exit_rx => {
            SpawnOutcome {
                pid,
                output: store.drain_any(pid).unwrap_or_default(),
                is_blocked: false,
            }
        }
        _ = tokio::time::sleep(request.initial_wait) => {
            store.mark_blocked(pid);
            SpawnOutcome {
                pid,
                output: store.drain_any(pid).unwrap_or_default(),
                is_blocked: true,
            }
        }
    }
}

/// Cooperative-then-forceful termination. Returns false when the pid is
/// not active; otherwise sends SIGTERM, schedules a SIGKILL after `grace`,
/// and returns immediately.
pub fn terminate(store: &SessionStore, pid: i32, grace: Duration) -> bool {
    if !store.is_active(pid) {
        return false;
    }
    signal_process(pid, SIGTERM);
    let store = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if store.is_active(pid) {
            tracing::warn!(pid, "session survived cooperative stop; sending SIGKILL");
            signal_process(pid, SIGKILL);
        }
    });
    true
}

async fn pump_stream<R>(store: SessionStore, pid: i32, mut stream: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                store.append_output(pid, &String::from_utf8_lossy(&chunk[..read]));
            }
            Err(error) => {
                tracing::debug!(pid, "output reader stopped: {error}");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_process(pid: i32, signal: libc::c_int) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

#[cfg(not(unix))]
fn signal_process(_pid: i32, _signal: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreLimits;
    use std::time::Instant;

    fn store() -> SessionStore {
        SessionStore::new(StoreLimits {
            max_completed: 16,
            max_age: Duration::from_secs(3600),
            max_buf_bytes: 64 * 1024,
        })
    }

    fn shell(command_line: &str) -> CommandSpec {
        CommandSpec::Shell {
            command_line: command_line.to_string(),
            shell: Some("/bin/sh".to_string()),
        }
    }

    async fn wait_until<F>(timeout: Duration, predicate: F)
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate() {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_fast_exit_returns_output_before_timer() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(shell("echo hi"), Duration::from_secs(5)),
        )
        .await;

        assert!(outcome.pid > 0);
        assert!(!outcome.is_blocked);
        assert_eq!(outcome.output, "hi\n");
        assert!(!store.is_active(outcome.pid));
        assert!(store.contains(outcome.pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_initial_wait_elapsing_marks_session_blocked() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(shell("echo early; sleep 5"), Duration::from_millis(200)),
        )
        .await;

        assert!(outcome.is_blocked);
        assert_eq!(outcome.output, "early\n");
        let info = store.active_metadata(outcome.pid).expect("still active");
        assert!(info.is_blocked);

        assert!(terminate(&store, outcome.pid, Duration::from_millis(200)));
        let probe = store.clone();
        let pid = outcome.pid;
        wait_until(Duration::from_secs(5), move || !probe.is_active(pid)).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_blocked_session_finalizes_on_natural_exit() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(shell("sleep 0.3; echo late"), Duration::from_millis(50)),
        )
        .await;
        assert!(outcome.is_blocked);

        let probe = store.clone();
        let pid = outcome.pid;
        wait_until(Duration::from_secs(5), move || !probe.is_active(pid)).await;
        let summary = store.completed_summary(outcome.pid).expect("completed");
        assert_eq!(summary.exit_code, 0);
        assert_eq!(summary.full_output, "late\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_stderr_is_merged_into_the_stream() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(shell("echo out; echo err 1>&2"), Duration::from_secs(5)),
        )
        .await;
        assert!(outcome.output.contains("out\n"));
        assert!(outcome.output.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_nonzero_exit_code_is_recorded() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(shell("exit 7"), Duration::from_secs(5)),
        )
        .await;
        assert_eq!(store.completed_exit_code(outcome.pid), Some(7));
    }

    #[tokio::test]
    async fn regression_spawn_failure_returns_sentinel_pid_without_session() {
        let store = store();
        let outcome = spawn_session(
            &store,
            SpawnRequest::new(
                CommandSpec::Direct {
                    program: "/nonexistent/definitely-not-a-binary".to_string(),
                    args: Vec::new(),
                },
                Duration::from_secs(1),
            ),
        )
        .await;

        assert_eq!(outcome.pid, SPAWN_FAILURE_PID);
        assert!(!outcome.is_blocked);
        assert!(outcome.output.contains("Failed to spawn"));
        assert_eq!(store.counts(), (0, 0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_terminate_unknown_pid_returns_false() {
        let store = store();
        assert!(!terminate(&store, 999_999, Duration::from_millis(10)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_env_overrides_reach_the_child() {
        let store = store();
        let mut request = SpawnRequest::new(shell("printf \"%s\" \"$PROBE_KEY\""), Duration::from_secs(5));
        request.env_set.push(("PROBE_KEY".to_string(), "probe-value".to_string()));
        let outcome = spawn_session(&store, request).await;
        assert_eq!(outcome.output, "probe-value");
    }

    #[test]
    fn unit_preview_is_clamped_for_long_commands() {
        let spec = CommandSpec::Shell {
            command_line: "x".repeat(500),
            shell: None,
        };
        assert!(spec.preview().chars().count() <= PREVIEW_MAX_CHARS + 1);
        assert!(spec.preview().ends_with('…'));
    }
}
