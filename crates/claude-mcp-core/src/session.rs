//! Session model: one tracked child process, keyed by OS pid.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::buffer::BoundedBuffer;

/// Lifecycle of a session. `Blocked` means the initial-wait timer elapsed
/// before the child exited; the process keeps running and keeps buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Blocked,
    Completed { exit_code: i32 },
    Failed { reason: String },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed { .. } | SessionState::Failed { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, SessionState::Blocked)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Running => write!(f, "running"),
            SessionState::Blocked => write!(f, "blocked"),
            SessionState::Completed { exit_code } => write!(f, "completed({exit_code})"),
            SessionState::Failed { reason } => write!(f, "failed({reason})"),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub pid: i32,
    pub command_preview: String,
    /// Bytes not yet consumed by a drain.
    pub buffer: BoundedBuffer,
    /// Bounded mirror of everything the child emitted since spawn.
    pub full_output: BoundedBuffer,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    pub ended_at: Option<Instant>,
    state: SessionState,
}

impl Session {
    pub fn new(pid: i32, command_preview: String, max_buf_bytes: usize) -> Self {
        Self {
            pid,
            command_preview,
            buffer: BoundedBuffer::new(max_buf_bytes),
            full_output: BoundedBuffer::new(max_buf_bytes),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            ended_at: None,
            state: SessionState::Running,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Applies a state transition, enforcing the allowed edges:
    /// Running → Blocked, and Running/Blocked → Completed/Failed.
    /// Illegal edges are dropped so a late finalize can never resurrect a
    /// terminal session.
    pub fn transition(&mut self, next: SessionState) -> bool {
        let allowed = match (&self.state, &next) {
            (SessionState::Running, SessionState::Blocked) => true,
            (SessionState::Running | SessionState::Blocked, SessionState::Completed { .. }) => true,
            (SessionState::Running | SessionState::Blocked, SessionState::Failed { .. }) => true,
            _ => false,
        };
        if !allowed {
            tracing::warn!(
                pid = self.pid,
                from = %self.state,
                to = %next,
                "ignored illegal session state transition"
            );
            return false;
        }
        if next.is_terminal() {
            self.ended_at = Some(Instant::now());
        }
        self.state = next;
        true
    }

    /// Appends a merged stdout/stderr chunk. Terminal sessions never mutate
    /// their output again.
    pub fn append_output(&mut self, chunk: &str) {
        if self.state.is_terminal() {
            return;
        }
        self.buffer.append(chunk);
        self.full_output.append(chunk);
    }

    pub fn runtime(&self) -> Duration {
        match self.ended_at {
            Some(ended) => ended.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }
}
