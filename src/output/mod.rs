//! Output channel between the engine and whoever displays its progress.
//!
//! The engine emits a small closed set of [`OutputMessage`] variants through
//! an [`Output`] handle. Each registered [`OutputSink`] declares which kinds
//! it wants via [`SinkCapabilities`]; the handle only forwards matching
//! messages.
//!
//! - [`sinks`] has the production sinks (tracing log, console).

pub mod sinks;

use std::fmt;
use std::sync::Arc;

use crate::types::TargetId;

pub use sinks::{ConsoleSink, LogSink};

/// Terminal hints that carry no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    /// Keep the cursor on the current line while output streams.
    StickCursor(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMessage {
    /// A command is about to run.
    Command { target: TargetId, command: String },
    /// One raw line of process output.
    Line { target: TargetId, line: String },
    /// Something went wrong; `context` names the offending command or path.
    Error {
        target: TargetId,
        message: String,
        context: Option<String>,
    },
    /// A process was started.
    ProcessId {
        target: TargetId,
        pid: u32,
        command: String,
    },
    /// Human-readable explanation of a skip, trigger match or stop.
    Info { target: TargetId, text: String },
    Control(ControlFlag),
}

impl OutputMessage {
    fn kind(&self) -> MessageKind {
        match self {
            OutputMessage::Command { .. } => MessageKind::Command,
            OutputMessage::Line { .. } => MessageKind::Line,
            OutputMessage::Error { .. } => MessageKind::Error,
            OutputMessage::ProcessId { .. } => MessageKind::ProcessId,
            OutputMessage::Info { .. } => MessageKind::Info,
            OutputMessage::Control(_) => MessageKind::Control,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Command,
    Line,
    Error,
    ProcessId,
    Info,
    Control,
}

/// Which message kinds a sink consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCapabilities {
    pub commands: bool,
    pub lines: bool,
    pub errors: bool,
    pub process_ids: bool,
    pub info: bool,
    pub control: bool,
}

impl SinkCapabilities {
    pub const ALL: SinkCapabilities = SinkCapabilities {
        commands: true,
        lines: true,
        errors: true,
        process_ids: true,
        info: true,
        control: true,
    };

    pub const NONE: SinkCapabilities = SinkCapabilities {
        commands: false,
        lines: false,
        errors: false,
        process_ids: false,
        info: false,
        control: false,
    };

    pub fn accepts(&self, msg: &OutputMessage) -> bool {
        match msg.kind() {
            MessageKind::Command => self.commands,
            MessageKind::Line => self.lines,
            MessageKind::Error => self.errors,
            MessageKind::ProcessId => self.process_ids,
            MessageKind::Info => self.info,
            MessageKind::Control => self.control,
        }
    }
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        SinkCapabilities::ALL
    }
}

/// A consumer of engine output (a log, a terminal UI, a test recorder).
pub trait OutputSink: Send + Sync {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::ALL
    }

    fn handle(&self, msg: &OutputMessage);
}

/// Cheaply cloneable fan-out handle over the registered sinks.
#[derive(Clone, Default)]
pub struct Output {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit(&self, msg: OutputMessage) {
        for sink in self.sinks.iter() {
            if sink.capabilities().accepts(&msg) {
                sink.handle(&msg);
            }
        }
    }

    pub fn info(&self, target: &str, text: impl Into<String>) {
        self.emit(OutputMessage::Info {
            target: target.to_string(),
            text: text.into(),
        });
    }

    pub fn error(&self, target: &str, message: impl Into<String>, context: Option<String>) {
        self.emit(OutputMessage::Error {
            target: target.to_string(),
            message: message.into(),
            context,
        });
    }
}
