// src/exec/terminal.rs

//! Long-lived shell that runs several commands in sequence.
//!
//! Completion of a command is detected with a sentinel line that carries
//! the exit code (`echo <SENTINEL>$?` after each command).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::exec::backend::CommandSession;
use crate::exec::process::{ExitState, ProcessRunner, ProcessSpec};

const SENTINEL: &str = "__TARGETFLOW_EXIT__";

/// One event read from a terminal while a command is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Line(String),
    /// The current command finished.
    Done(ExitState),
    /// The shell itself went away.
    Closed(ExitState),
}

/// A keep-alive shell.
#[derive(Debug)]
pub struct Terminal {
    runner: ProcessRunner,
    pending_done: Option<ExitState>,
}

impl Terminal {
    pub async fn spawn(shell: &str, cwd: &Path, idle_timeout: Option<Duration>) -> Result<Self> {
        let startup_commands = if cfg!(windows) {
            Vec::new()
        } else {
            // Merge stderr into stdout for the whole session.
            vec!["exec 2>&1".to_string()]
        };
        let spec = ProcessSpec {
            program: shell.to_string(),
            cwd: Some(cwd.to_path_buf()),
            startup_commands,
            keep_alive: true,
            idle_timeout,
            ..ProcessSpec::default()
        };
        let runner = ProcessRunner::spawn(spec).await?;
        Ok(Self {
            runner,
            pending_done: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.runner.pid()
    }

    pub fn is_active(&mut self) -> bool {
        self.runner.is_running()
    }

    /// Send a command followed by the exit-code sentinel.
    pub async fn begin(&mut self, command: &str) -> Result<()> {
        self.pending_done = None;
        self.runner.send(command).await?;
        let marker = if cfg!(windows) {
            format!("echo {SENTINEL}%errorlevel%")
        } else {
            format!("echo {SENTINEL}$?")
        };
        self.runner.send(&marker).await
    }

    pub async fn next_event(&mut self) -> TerminalEvent {
        if let Some(done) = self.pending_done.take() {
            return TerminalEvent::Done(done);
        }
        let Some(line) = self.runner.next_line().await else {
            let exit = self.runner.wait().await;
            return TerminalEvent::Closed(exit);
        };
        match line.find(SENTINEL) {
            None => TerminalEvent::Line(line),
            Some(idx) => {
                let code = line[idx + SENTINEL.len()..].trim().parse::<i32>().unwrap_or(-1);
                let done = ExitState::from_code(code);
                let prefix = &line[..idx];
                if prefix.is_empty() {
                    TerminalEvent::Done(done)
                } else {
                    // Output without a trailing newline shares the line with
                    // the sentinel.
                    self.pending_done = Some(done);
                    TerminalEvent::Line(prefix.to_string())
                }
            }
        }
    }

    pub async fn stop(&mut self) -> ExitState {
        debug!(pid = ?self.runner.pid(), "stopping terminal");
        self.runner.stop().await
    }
}

/// A single command running inside a shared [`Terminal`].
///
/// Holds the terminal lock for the lifetime of the command so that commands
/// of one target never interleave.
pub struct TerminalSession {
    terminal: OwnedMutexGuard<Terminal>,
    exit: Option<ExitState>,
}

impl TerminalSession {
    pub async fn open(terminal: Arc<Mutex<Terminal>>, command: &str) -> Result<Self> {
        let mut guard = terminal.lock_owned().await;
        guard.begin(command).await?;
        Ok(Self {
            terminal: guard,
            exit: None,
        })
    }
}

impl CommandSession for TerminalSession {
    fn pid(&self) -> Option<u32> {
        self.terminal.pid()
    }

    fn next_line(&mut self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            if self.exit.is_some() {
                return None;
            }
            match self.terminal.next_event().await {
                TerminalEvent::Line(line) => Some(line),
                TerminalEvent::Done(exit) | TerminalEvent::Closed(exit) => {
                    self.exit = Some(exit);
                    None
                }
            }
        })
    }

    fn wait(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(async move {
            while self.exit.is_none() {
                if self.next_line().await.is_none() {
                    break;
                }
            }
            self.exit
                .clone()
                .unwrap_or_else(|| ExitState::failed("terminal closed"))
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(async move {
            let exit = self.terminal.stop().await;
            self.exit = Some(exit.clone());
            exit
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn run(terminal: &mut Terminal, cmd: &str) -> (Vec<String>, ExitState) {
        terminal.begin(cmd).await.unwrap();
        let mut lines = Vec::new();
        loop {
            match terminal.next_event().await {
                TerminalEvent::Line(l) => lines.push(l),
                TerminalEvent::Done(exit) | TerminalEvent::Closed(exit) => return (lines, exit),
            }
        }
    }

    #[tokio::test]
    async fn commands_share_one_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mut terminal = Terminal::spawn("sh", dir.path(), None).await.unwrap();

        let (_, exit) = run(&mut terminal, "GREETING=hi").await;
        assert!(exit.success());

        let (lines, exit) = run(&mut terminal, "echo $GREETING; echo oops >&2").await;
        assert_eq!(lines, vec!["hi".to_string(), "oops".to_string()]);
        assert!(exit.success());

        let (_, exit) = run(&mut terminal, "false").await;
        assert_eq!(exit.real_code, Some(1));

        let (lines, _) = run(&mut terminal, "printf partial").await;
        assert_eq!(lines, vec!["partial".to_string()]);

        assert!(terminal.is_active());
        terminal.stop().await;
        assert!(!terminal.is_active());
    }
}
