//! Workspace Assembler (spec.md §4.L) — composes `<workspace>/CLAUDE.md`
//! deterministically from shared persona files, per-user profile, an
//! optional per-workspace personality override, recent daily memory lines,
//! and an important-instructions file.

pub mod assembler;
pub mod error;

pub use assembler::WorkspaceAssembler;
pub use error::{Result, WorkspaceError};
