//! Two-partition session registry: active sessions keyed by pid, completed
//! sessions retained FIFO up to a count cap and a TTL.
//!
//! All mutations go through one mutex; critical sections never await.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::session::{Session, SessionState};

/// Active sessions older than this are force-terminated by the sweep pass.
pub const HARD_ACTIVE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_completed: usize,
    pub max_age: Duration,
    pub max_buf_bytes: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    active: HashMap<i32, Session>,
    completed: HashMap<i32, Session>,
    /// Pids in finalization order; front is the oldest completed session.
    completion_order: VecDeque<i32>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreState>>,
    limits: StoreLimits,
}

/// Snapshot row returned by [`SessionStore::list_active`].
#[derive(Debug, Clone)]
pub struct ActiveSessionInfo {
    pub pid: i32,
    pub is_blocked: bool,
    pub runtime_ms: u64,
}

/// Metadata for a single active session, used by tool replies.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub pid: i32,
    pub is_blocked: bool,
    pub runtime_ms: u64,
    pub started_wall: DateTime<Utc>,
}

/// What a completed session looked like at finalization time.
#[derive(Debug, Clone)]
pub struct CompletedSummary {
    pub exit_code: i32,
    pub runtime_secs: f64,
    pub full_output: String,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState::default())),
            limits,
        }
    }

    pub fn max_buf_bytes(&self) -> usize {
        self.limits.max_buf_bytes
    }

    /// Registers a freshly spawned session. An OS-reused pid evicts any
    /// stale completed entry first so the pid stays unique across both
    /// partitions.
    pub fn insert_active(&self, session: Session) {
        let mut state = lock_or_recover(&self.inner);
        let pid = session.pid;
        if state.completed.remove(&pid).is_some() {
            state.completion_order.retain(|candidate| *candidate != pid);
            tracing::debug!(pid, "evicted stale completed session before pid reuse");
        }
        if state.active.insert(pid, session).is_some() {
            tracing::warn!(pid, "replaced existing active session with reused pid");
        }
    }

    /// Appends a merged output chunk to an active session. Chunks arriving
    /// for unknown pids are dropped.
    pub fn append_output(&self, pid: i32, chunk: &str) {
        let mut state = lock_or_recover(&self.inner);
        if let Some(session) = state.active.get_mut(&pid) {
            session.append_output(chunk);
        }
    }

    pub fn mark_blocked(&self, pid: i32) -> bool {
        let mut state = lock_or_recover(&self.inner);
        match state.active.get_mut(&pid) {
            Some(session) => session.transition(SessionState::Blocked),
            None => false,
        }
    }

    /// Drains the unconsumed buffer of a session in either partition. Used
    /// by the runner when assembling the initial-wait reply.
    pub fn drain_any(&self, pid: i32) -> Option<String> {
        let mut state = lock_or_recover(&self.inner);
        if let Some(session) = state.active.get_mut(&pid) {
            return Some(session.buffer.drain());
        }
        state
            .completed
            .get_mut(&pid)
            .map(|session| session.buffer.drain())
    }

    /// Drains the unconsumed buffer of an active session only.
    pub fn drain_active(&self, pid: i32) -> Option<String> {
        let mut state = lock_or_recover(&self.inner);
        state
            .active
            .get_mut(&pid)
            .map(|session| session.buffer.drain())
    }

    /// Moves a session from `active` to `completed` with its terminal
    /// state, then enforces the retention cap. A pid no longer present in
    /// `active` (terminated and swept) is dropped silently.
    pub fn finalize(&self, pid: i32, terminal: SessionState) {
        let mut state = lock_or_recover(&self.inner);
        let Some(mut session) = state.active.remove(&pid) else {
            tracing::debug!(pid, "finalize for unknown pid dropped");
            return;
        };
        session.transition(terminal);
        state.completed.insert(pid, session);
        state.completion_order.push_back(pid);

        while state.completed.len() > self.limits.max_completed {
            let Some(oldest) = state.completion_order.pop_front() else {
                break;
            };
            if state.completed.remove(&oldest).is_some() {
                tracing::debug!(pid = oldest, "evicted completed session past retention cap");
            }
        }
    }

    pub fn is_active(&self, pid: i32) -> bool {
        lock_or_recover(&self.inner).active.contains_key(&pid)
    }

    pub fn contains(&self, pid: i32) -> bool {
        let state = lock_or_recover(&self.inner);
        state.active.contains_key(&pid) || state.completed.contains_key(&pid)
    }

    pub fn active_metadata(&self, pid: i32) -> Option<SessionMetadata> {
        let state = lock_or_recover(&self.inner);
        state.active.get(&pid).map(|session| SessionMetadata {
            pid,
            is_blocked: session.state().is_blocked(),
            runtime_ms: session.runtime().as_millis() as u64,
            started_wall: session.started_wall,
        })
    }

    pub fn completed_summary(&self, pid: i32) -> Option<CompletedSummary> {
        let state = lock_or_recover(&self.inner);
        state.completed.get(&pid).map(|session| {
            let exit_code = match session.state() {
                SessionState::Completed { exit_code } => *exit_code,
                _ => -1,
            };
            CompletedSummary {
                exit_code,
                runtime_secs: session.runtime().as_secs_f64(),
                full_output: session.full_output.contents().to_string(),
            }
        })
    }

    pub fn completed_exit_code(&self, pid: i32) -> Option<i32> {
        let state = lock_or_recover(&self.inner);
        state
            .completed
            .get(&pid)
            .map(|session| match session.state() {
                SessionState::Completed { exit_code } => *exit_code,
                _ => -1,
            })
    }

    pub fn list_active(&self) -> Vec<ActiveSessionInfo> {
        let state = lock_or_recover(&self.inner);
        let mut sessions = state
            .active
            .values()
            .map(|session| ActiveSessionInfo {
                pid: session.pid,
                is_blocked: session.state().is_blocked(),
                runtime_ms: session.runtime().as_millis() as u64,
            })
            .collect::<Vec<_>>();
        sessions.sort_by_key(|info| info.pid);
        sessions
    }

    /// Evicts completed sessions older than the configured TTL and returns
    /// the pids of active sessions past [`HARD_ACTIVE_AGE`] so the caller
    /// can terminate them.
    pub fn sweep(&self, now: Instant) -> Vec<i32> {
        let mut state = lock_or_recover(&self.inner);
        let max_age = self.limits.max_age;

        let mut evicted = 0usize;
        state.completed.retain(|_, session| {
            let keep = session
                .ended_at
                .map(|ended| now.duration_since(ended) <= max_age)
                .unwrap_or(true);
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            let live: HashSet<i32> = state.completed.keys().copied().collect();
            state.completion_order.retain(|pid| live.contains(pid));
            tracing::debug!(evicted, "sweep removed aged-out completed sessions");
        }

        state
            .active
            .values()
            .filter(|session| now.duration_since(session.started_at) > HARD_ACTIVE_AGE)
            .map(|session| session.pid)
            .collect()
    }

    pub fn counts(&self) -> (usize, usize) {
        let state = lock_or_recover(&self.inner);
        (state.active.len(), state.completed.len())
    }
}
