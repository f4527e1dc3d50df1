// src/exec/backend.rs

//! Pluggable command backend abstraction.
//!
//! The line executor talks to a `CommandBackend` instead of spawning
//! processes itself. This keeps alternative command engines (and fake
//! backends in tests) behind the same capability set: start a command,
//! stream its output lines, then wait for or stop it.
//!
//! - [`ShellBackend`] is the default implementation. Each line becomes one
//!   `<shell> <args...> <line>` process via [`ProcessRunner`].
//! - Tests can provide their own `CommandBackend` that records commands and
//!   replays canned output without spawning anything.

use std::path::PathBuf;

use futures::future::BoxFuture;

use crate::errors::Result;
use crate::exec::process::{ExitState, ProcessRunner, ProcessSpec};
use crate::types::TargetId;

/// One command to run on behalf of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub target: TargetId,
    /// The literal script line.
    pub line: String,
    /// Interpreter and its leading arguments.
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// A started command.
pub trait CommandSession: Send {
    fn pid(&self) -> Option<u32>;

    /// Next output line; `None` when the command produced all its output.
    fn next_line(&mut self) -> BoxFuture<'_, Option<String>>;

    /// Wait for the command to finish on its own.
    fn wait(&mut self) -> BoxFuture<'_, ExitState>;

    /// Stop the command (and anything it spawned).
    fn stop(&mut self) -> BoxFuture<'_, ExitState>;
}

/// Trait abstracting how script lines are executed.
pub trait CommandBackend: Send + Sync {
    fn start(&self, request: CommandRequest) -> BoxFuture<'_, Result<Box<dyn CommandSession>>>;
}

/// Real backend: one shell process per line.
#[derive(Debug, Clone, Default)]
pub struct ShellBackend;

impl CommandBackend for ShellBackend {
    fn start(&self, request: CommandRequest) -> BoxFuture<'_, Result<Box<dyn CommandSession>>> {
        Box::pin(async move {
            let spec = ProcessSpec::shell_line(&request.program, &request.args, &request.line)
                .with_cwd(request.cwd);
            let runner = ProcessRunner::spawn(spec).await?;
            Ok(Box::new(runner) as Box<dyn CommandSession>)
        })
    }
}

impl CommandSession for ProcessRunner {
    fn pid(&self) -> Option<u32> {
        ProcessRunner::pid(self)
    }

    fn next_line(&mut self) -> BoxFuture<'_, Option<String>> {
        Box::pin(ProcessRunner::next_line(self))
    }

    fn wait(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(ProcessRunner::wait(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(ProcessRunner::stop(self))
    }
}

/// Run a command to completion and collect every output line.
pub async fn capture(
    backend: &dyn CommandBackend,
    request: CommandRequest,
) -> Result<(Vec<String>, ExitState)> {
    let mut session = backend.start(request).await?;
    let mut lines = Vec::new();
    while let Some(line) = session.next_line().await {
        lines.push(line);
    }
    let exit = session.wait().await;
    Ok((lines, exit))
}
