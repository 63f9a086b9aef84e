//! Session tracking and subprocess plumbing for the Claude MCP server.
//!
//! The crate is layered leaves-first: a bounded output buffer, the session
//! model and its two-partition store, the tokio process runner that feeds
//! sessions, and the manager facade the tool layer talks to.

pub mod buffer;
pub mod config;
pub mod manager;
pub mod runner;
pub mod session;
pub mod store;

pub use buffer::BoundedBuffer;
pub use config::ServerConfig;
pub use manager::SessionManager;
pub use runner::{CommandSpec, SpawnOutcome, SpawnRequest, SPAWN_FAILURE_PID};
pub use session::{Session, SessionState};
pub use store::{ActiveSessionInfo, SessionStore, HARD_ACTIVE_AGE};
