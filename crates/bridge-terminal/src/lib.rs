//! bridge-terminal — interactive PTY terminal sessions for Bridge agents.
//!
//! Provides three execution modes:
//! - `OneShot`: fire-and-forget command via `exec` (async, with timeout + safety)
//! - `Interactive`: persistent PTY session (SSH, sudo, vim, …)
//! - `Background`: long-running process tracked by `JobId`
//!
//! # Quick start
//!
//! ```rust,no_run
//! use bridge_terminal::manager::TerminalManager;
//! use bridge_terminal::types::ExecOptions;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut mgr = TerminalManager::new();
//!
//!     // Safe one-shot exec with a 30-second timeout.
//!     let result = mgr.exec("echo hello", ExecOptions::default()).await.unwrap();
//!     println!("{}", result.stdout);
//!
//!     // Interactive PTY session.
//!     let id = mgr.create_session(None, None).await.unwrap();
//!     mgr.write(&id, "echo hello\n").await.unwrap();
//!     let output = mgr.read(&id).await.unwrap();
//!     println!("{output}");
//! }
//! ```

pub mod error;
pub mod freeze;
pub mod glyphs;
pub mod manager;
pub mod multiplexer;
pub mod pane;
pub mod safety;
pub mod session;
pub mod status_poller;
pub mod truncate;
pub mod types;

pub use error::{Result, TerminalError};
pub use freeze::FreezeDetector;
pub use multiplexer::{Multiplexer, TmuxMultiplexer};
pub use pane::{extract_interactive_frame, is_interactive_ui, parse_status_line, InteractiveFrame, InteractiveTag};
pub use status_poller::{StatusPoller, StatusSink};
pub use types::{
    BackgroundJob, ExecMode, ExecOptions, ExecResult, JobId, JobStatus, SessionId, SessionInfo,
};
