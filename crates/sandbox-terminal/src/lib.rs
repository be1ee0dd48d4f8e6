//! Terminal registry for the sandbox session runtime.
//!
//! Provides:
//! - `TerminalRegistry` - spawned interactive shells and their viewers
//! - Shell detection utilities shared with the action runner

pub mod registry;
pub mod shell;

pub use registry::{TerminalError, TerminalRegistry};
pub use shell::{UnixShell, interactive_shell, shell_command};
