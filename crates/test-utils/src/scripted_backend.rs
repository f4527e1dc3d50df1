use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use targetflow::errors::{Result, TargetflowError};
use targetflow::exec::{CommandBackend, CommandRequest, CommandSession, ExitState};

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    lines: Vec<String>,
    code: i32,
    delay: Duration,
    fail_to_start: bool,
}

/// A fake command backend that:
/// - records every command it is asked to start
/// - replays canned output and exit codes for commands containing a needle
/// - treats `echo <text>` as printing `<text>` when no rule matches
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    rules: Mutex<Vec<Rule>>,
    invocations: Mutex<Vec<CommandRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, rule: Rule) -> Self {
        self.rules.lock().unwrap().push(rule);
        self
    }

    /// Commands containing `needle` print `lines` and exit with `code`.
    pub fn respond(self, needle: &str, lines: &[&str], code: i32) -> Self {
        self.push(Rule {
            needle: needle.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            code,
            delay: Duration::ZERO,
            fail_to_start: false,
        })
    }

    /// Commands containing `needle` take `delay` before producing output.
    pub fn slow(self, needle: &str, delay: Duration) -> Self {
        self.push(Rule {
            needle: needle.to_string(),
            lines: Vec::new(),
            code: 0,
            delay,
            fail_to_start: false,
        })
    }

    /// Commands containing `needle` cannot be started.
    pub fn fail_to_start(self, needle: &str) -> Self {
        self.push(Rule {
            needle: needle.to_string(),
            lines: Vec::new(),
            code: 0,
            delay: Duration::ZERO,
            fail_to_start: true,
        })
    }

    pub fn invocations(&self) -> Vec<CommandRequest> {
        self.invocations.lock().unwrap().clone()
    }

    /// Started script lines, in start order.
    pub fn commands(&self) -> Vec<String> {
        self.invocations().into_iter().map(|r| r.line).collect()
    }

    /// How many started lines contain `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    fn session_for(&self, line: &str) -> Option<ScriptedSession> {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| line.contains(&r.needle))
            .cloned();

        match rule {
            Some(rule) if rule.fail_to_start => None,
            Some(rule) => Some(ScriptedSession::new(rule.lines, rule.code, rule.delay)),
            None => {
                let lines = match line.strip_prefix("echo ") {
                    Some(text) => vec![text.to_string()],
                    None => Vec::new(),
                };
                Some(ScriptedSession::new(lines, 0, Duration::ZERO))
            }
        }
    }
}

impl CommandBackend for ScriptedBackend {
    fn start(&self, request: CommandRequest) -> BoxFuture<'_, Result<Box<dyn CommandSession>>> {
        Box::pin(async move {
            let line = request.line.clone();
            self.invocations.lock().unwrap().push(request);
            match self.session_for(&line) {
                Some(session) => Ok(Box::new(session) as Box<dyn CommandSession>),
                None => Err(TargetflowError::Other(anyhow::anyhow!(
                    "cannot start '{line}'"
                ))),
            }
        })
    }
}

struct ScriptedSession {
    lines: VecDeque<String>,
    code: i32,
    delay: Option<Duration>,
    stopped: bool,
}

impl ScriptedSession {
    fn new(lines: Vec<String>, code: i32, delay: Duration) -> Self {
        Self {
            lines: lines.into(),
            code,
            delay: (!delay.is_zero()).then_some(delay),
            stopped: false,
        }
    }
}

impl CommandSession for ScriptedSession {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn next_line(&mut self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            if let Some(delay) = self.delay.take() {
                tokio::time::sleep(delay).await;
            }
            if self.stopped {
                return None;
            }
            self.lines.pop_front()
        })
    }

    fn wait(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(async move {
            if let Some(delay) = self.delay.take() {
                tokio::time::sleep(delay).await;
            }
            if self.stopped {
                ExitState::failed("stopped")
            } else {
                ExitState::from_code(self.code)
            }
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, ExitState> {
        Box::pin(async move {
            self.stopped = true;
            self.lines.clear();
            ExitState::failed("stopped")
        })
    }
}
