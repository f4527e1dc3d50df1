use std::sync::Mutex;

use targetflow::output::{OutputMessage, OutputSink};

/// An output sink that keeps every message it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutputMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutputMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Output lines of `target`, in arrival order.
    pub fn lines_of(&self, target: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Line { target: t, line } if t == target => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Commands announced for `target`.
    pub fn commands_of(&self, target: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Command { target: t, command } if t == target => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Info texts for `target`.
    pub fn infos_of(&self, target: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Info { target: t, text } if t == target => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Error messages, for any target.
    pub fn errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::Error { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn handle(&self, msg: &OutputMessage) {
        self.messages.lock().unwrap().push(msg.clone());
    }
}
