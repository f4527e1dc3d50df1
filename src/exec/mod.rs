// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`process`] spawns one OS process with a merged output line stream.
//! - [`terminal`] keeps a shell alive across several commands.
//! - [`registry`] owns the keep-alive terminals, one per target.
//! - [`backend`] provides the `CommandBackend` trait and the default
//!   `ShellBackend`; tests replace it with a scripted implementation.

pub mod backend;
pub mod process;
pub mod registry;
pub mod terminal;

pub use backend::{capture, CommandBackend, CommandRequest, CommandSession, ShellBackend};
pub use process::{ExitState, ProcessRunner, ProcessSpec};
pub use registry::TaskRunnerRegistry;
pub use terminal::{Terminal, TerminalSession};
