// src/engine/lines.rs

//! Execution of one literal script line.
//!
//! [`LineRunner`] is the [`LineHandler`] the preprocessor feeds while a block
//! runs. For every line it starts a command (one-shot through the command
//! backend, or inside the target's keep-alive terminal), forwards output to
//! the sinks, and scans each output line against the block's listeners and
//! stop reasons.

use std::path::Path;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::config::model::{Listener, TargetDefinition};
use crate::errors::Result;
use crate::exec::{capture, CommandRequest, CommandSession, TerminalSession};
use crate::output::{ControlFlag, OutputMessage};
use crate::preprocess::{LineHandler, LineVerdict, Preprocessor};
use crate::requirements::{check_reason, ReasonInput};
use crate::types::TargetExit;
use crate::vars::ScopeVars;

use super::executor::{Invocation, TargetExecutor};

/// Runs the lines of one block invocation.
#[derive(Clone, Copy)]
pub(crate) struct LineRunner<'a> {
    pub executor: &'a TargetExecutor,
    pub target: &'a str,
    pub block: &'a TargetDefinition,
    pub scope: &'a ScopeVars,
    pub cwd: &'a Path,
    /// Handed to targets started by listeners.
    pub child: &'a Invocation,
    /// Route lines through the keep-alive terminal when the block asks for
    /// one. Off for listener scripts, which run while the terminal is busy.
    pub use_terminal: bool,
    /// Evaluate the block's listeners against output. Off for listener
    /// scripts so a script cannot re-trigger its own listener.
    pub scan_listeners: bool,
}

impl<'a> LineRunner<'a> {
    fn placeholder_key(&self, suffix: &str) -> String {
        format!("RUN.{}.{suffix}", self.target)
    }

    /// Interpreter and leading arguments for this block.
    fn shell(&self) -> (String, Vec<String>) {
        let settings = self.executor.settings();
        let opts = &self.block.options;
        match opts.main_cmd {
            Some(ref cmd) => (
                cmd.clone(),
                opts.main_params
                    .clone()
                    .unwrap_or_else(|| settings.shell_args.clone()),
            ),
            None => (settings.shell.clone(), settings.shell_args.clone()),
        }
    }

    fn request(&self, line: &str) -> CommandRequest {
        let (program, args) = self.shell();
        CommandRequest {
            target: self.target.to_string(),
            line: line.to_string(),
            program,
            args,
            cwd: self.cwd.to_path_buf(),
        }
    }

    async fn start(&self, line: &str) -> Result<Box<dyn CommandSession>> {
        let opts = &self.block.options;
        if self.use_terminal && opts.keep_alive {
            let (program, _) = self.shell();
            let terminal = self
                .executor
                .runners()
                .get_runner_for_task(self.target, &program, self.cwd, opts.idle_timeout())
                .await?;
            let session = TerminalSession::open(terminal, line).await?;
            return Ok(Box::new(session));
        }
        self.executor.backend().start(self.request(line)).await
    }

    async fn run_line(&self, line: &str) -> LineVerdict {
        let placeholders = self.executor.placeholders();
        let output = self.executor.output();
        let opts = &self.block.options;
        let visible = !opts.invisible;

        placeholders.set("RUN.TARGET", self.target);
        placeholders.set(self.placeholder_key("CMD.LAST"), line);

        if opts.display_cmd && visible {
            output.emit(OutputMessage::Command {
                target: self.target.to_string(),
                command: line.to_string(),
            });
        }

        let mut session = match self.start(line).await {
            Ok(session) => session,
            Err(e) => {
                warn!(target_id = %self.target, cmd = %line, error = %e, "failed to start command");
                output.error(
                    self.target,
                    format!("failed to start command: {e}"),
                    Some(line.to_string()),
                );
                return LineVerdict::abort(TargetExit::CmdError);
            }
        };

        if let Some(pid) = session.pid() {
            output.emit(OutputMessage::ProcessId {
                target: self.target.to_string(),
                pid,
                command: line.to_string(),
            });
        }

        let streaming = visible && !opts.hide_output;
        if streaming {
            output.emit(OutputMessage::Control(ControlFlag::StickCursor(true)));
        }

        let mut stop_reason = None;
        while let Some(out) = session.next_line().await {
            if streaming {
                output.emit(OutputMessage::Line {
                    target: self.target.to_string(),
                    line: out.clone(),
                });
            }
            placeholders.set(self.placeholder_key("LOG.LAST"), out.as_str());

            if let Some(reason) = self.scan(ReasonInput::line(&out), true).await {
                stop_reason = Some(reason);
                break;
            }
        }

        if streaming {
            output.emit(OutputMessage::Control(ControlFlag::StickCursor(false)));
        }

        if let Some(reason) = stop_reason {
            let exit = session.stop().await;
            info!(target_id = %self.target, cmd = %line, %reason, code = exit.internal_code, "line stopped");
            output.info(self.target, format!("stopped: {reason}"));
            return LineVerdict::abort(TargetExit::ByStopReason);
        }

        let exit = session.wait().await;
        if exit.success() {
            return LineVerdict::proceed(TargetExit::Ok);
        }

        let error = exit
            .error
            .clone()
            .unwrap_or_else(|| format!("exit code {}", exit.internal_code));
        debug!(target_id = %self.target, cmd = %line, %error, "command failed");

        if opts.ignore_cmd_error {
            if let Some(reason) = self.scan(ReasonInput::error(&error), true).await {
                output.info(self.target, format!("stopped: {reason}"));
                return LineVerdict::abort(TargetExit::ByStopReason);
            }
            return LineVerdict::proceed(TargetExit::Ok);
        }

        // Listeners still see the error; the block ends either way.
        self.scan(ReasonInput::error(&error), false).await;
        output.error(
            self.target,
            format!("command failed: {error}"),
            Some(line.to_string()),
        );
        LineVerdict::abort(TargetExit::CmdError)
    }

    /// Evaluate listeners, then stop reasons, against one input.
    ///
    /// Returns the reason when the current line must stop.
    async fn scan(&self, input: ReasonInput<'_>, with_stop_reasons: bool) -> Option<String> {
        let placeholders = self.executor.placeholders();
        let output = self.executor.output();

        let listeners = self
            .block
            .listener
            .iter()
            .filter(|l| self.scan_listeners && !l.trigger.now && !l.trigger.is_empty());
        for listener in listeners {
            let hit = check_reason(&listener.trigger, input, placeholders, self.scope);
            if !hit.matched {
                continue;
            }
            placeholders.set(self.placeholder_key("LOG.HIT"), hit.reason.as_str());
            info!(target_id = %self.target, reason = %hit.reason, "listener matched");
            output.info(self.target, format!("listener matched: {}", hit.reason));
            if self.fire(listener).await {
                return Some(hit.reason);
            }
        }

        let stop = &self.block.stop_reasons;
        if with_stop_reasons && !stop.is_empty() {
            let hit = check_reason(stop, input, placeholders, self.scope);
            if hit.matched {
                placeholders.set(self.placeholder_key("LOG.HIT"), hit.reason.as_str());
                return Some(hit.reason);
            }
        }
        None
    }

    /// Run a listener's action synchronously. Returns whether it asks to stop.
    pub(crate) async fn fire(&self, listener: &Listener) -> bool {
        let action = &listener.action;

        if !action.script.is_empty() {
            let inline = LineRunner {
                use_terminal: false,
                scan_listeners: false,
                ..*self
            };
            let preprocessor = Preprocessor::new(
                self.target,
                self.executor.placeholders(),
                self.executor.data_maps(),
                self.executor.output(),
                self.scope,
                self.cwd,
            );
            let expansion = preprocessor.expand(action.script.clone(), &inline).await;
            debug!(target_id = %self.target, code = %expansion.last_code, "listener script done");
        }

        if let Some(ref target) = action.target {
            let exit = self
                .executor
                .invoke(target.clone(), self.child.clone(), false)
                .await;
            debug!(target_id = %self.target, triggered = %target, %exit, "listener target done");
        }

        action.stop
    }
}

impl LineHandler for LineRunner<'_> {
    fn execute<'b>(&'b self, line: &'b str) -> BoxFuture<'b, LineVerdict> {
        Box::pin(self.run_line(line))
    }

    fn capture<'b>(&'b self, command: &'b str) -> BoxFuture<'b, Result<Vec<String>>> {
        Box::pin(async move {
            let (lines, exit) = capture(self.executor.backend().as_ref(), self.request(command)).await?;
            if !exit.success() {
                debug!(target_id = %self.target, cmd = %command, code = exit.internal_code, "captured command failed");
            }
            Ok(lines)
        })
    }
}
