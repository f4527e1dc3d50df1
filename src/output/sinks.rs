use std::io::Write;

use tracing::{debug, info, warn};

use super::{ControlFlag, OutputMessage, OutputSink, SinkCapabilities};

/// Mirrors engine output into the `tracing` log.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn handle(&self, msg: &OutputMessage) {
        match msg {
            OutputMessage::Command { target, command } => {
                debug!(target_id = %target, cmd = %command, "command");
            }
            OutputMessage::Line { target, line } => {
                debug!(target_id = %target, "output: {}", line);
            }
            OutputMessage::Error {
                target,
                message,
                context,
            } => {
                warn!(target_id = %target, context = ?context, "{}", message);
            }
            OutputMessage::ProcessId {
                target,
                pid,
                command,
            } => {
                debug!(target_id = %target, pid, cmd = %command, "process started");
            }
            OutputMessage::Info { target, text } => {
                info!(target_id = %target, "{}", text);
            }
            OutputMessage::Control(flag) => {
                debug!(?flag, "control flag");
            }
        }
    }
}

/// Plain console output: target output on stdout, errors on stderr.
#[derive(Debug, Default, Clone)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            process_ids: false,
            info: false,
            ..SinkCapabilities::ALL
        }
    }

    fn handle(&self, msg: &OutputMessage) {
        // Write errors on a closed stdout are not worth aborting a run for.
        let mut stdout = std::io::stdout().lock();
        match msg {
            OutputMessage::Command { target, command } => {
                let _ = writeln!(stdout, "[{target}] $ {command}");
            }
            OutputMessage::Line { target, line } => {
                let _ = writeln!(stdout, "[{target}] {line}");
            }
            OutputMessage::Error {
                target,
                message,
                context,
            } => match context {
                Some(ctx) => eprintln!("[{target}] error: {message} ({ctx})"),
                None => eprintln!("[{target}] error: {message}"),
            },
            OutputMessage::Control(ControlFlag::StickCursor(_)) => {
                let _ = stdout.flush();
            }
            OutputMessage::ProcessId { .. } | OutputMessage::Info { .. } => {}
        }
    }
}
