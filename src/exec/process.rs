// src/exec/process.rs

//! One OS process with a merged stdout/stderr line stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::proctree::{ProcessTreeWatcher, SignalPlan};

/// How often the idle watchdog looks at the clock.
const WATCHDOG_TICK: Duration = Duration::from_millis(20);

/// Upper bound for output readers to drain after a stop. A daemonized
/// grandchild may keep a pipe open forever.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// What to spawn and how.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to stdin right after spawning.
    pub startup_commands: Vec<String>,
    /// Keep stdin open for [`ProcessRunner::send`]; otherwise it is closed
    /// after the startup commands.
    pub keep_alive: bool,
    /// Stop a keep-alive process after this long without output or input.
    pub idle_timeout: Option<Duration>,
}

impl ProcessSpec {
    /// One-shot `<shell> <shell_args...> <line>`.
    pub fn shell_line(shell: &str, shell_args: &[String], line: &str) -> Self {
        let mut args = shell_args.to_vec();
        args.push(line.to_string());
        Self {
            program: shell.to_string(),
            args,
            ..Self::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in self.args.iter() {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

/// Captured exit state of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitState {
    /// 0 on success, the real code otherwise, -1 if there is none.
    pub internal_code: i32,
    /// Exit code reported by the OS; `None` when killed by a signal.
    pub real_code: Option<i32>,
    pub error: Option<String>,
}

impl ExitState {
    pub fn success(&self) -> bool {
        self.internal_code == 0 && self.error.is_none()
    }

    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::default()
        } else {
            Self {
                internal_code: code,
                real_code: Some(code),
                error: Some(format!("exit status {code}")),
            }
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            internal_code: -1,
            real_code: None,
            error: Some(error.into()),
        }
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::from_code(code),
            None => Self::failed("terminated by signal"),
        }
    }
}

/// A spawned process plus its pipes.
///
/// Owned exclusively by whoever spawned it; dropping it kills the process.
pub struct ProcessRunner {
    command_line: String,
    child: Child,
    pid: Option<u32>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    lines: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    keep_running: Arc<AtomicBool>,
    last_activity: Arc<Mutex<Instant>>,
    exit: Option<ExitState>,
    signal_plan: SignalPlan,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("command_line", &self.command_line)
            .field("pid", &self.pid)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    pub async fn spawn(spec: ProcessSpec) -> Result<Self> {
        let command_line = spec.display();
        info!(cmd = %command_line, keep_alive = spec.keep_alive, "spawning process");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in spec.env.iter() {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process '{command_line}'"))?;
        let pid = child.id();

        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let (tx, lines) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone(), last_activity.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx, last_activity.clone(), "stderr"));
        }

        let mut stdin = child.stdin.take();
        if let Some(ref mut pipe) = stdin {
            for line in spec.startup_commands.iter() {
                write_line(pipe, line)
                    .await
                    .with_context(|| format!("writing startup command to '{command_line}'"))?;
            }
        }
        if !spec.keep_alive {
            // One-shot: EOF on stdin.
            stdin = None;
        }

        let mut runner = Self {
            command_line,
            child,
            pid,
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            lines,
            readers,
            watchdog: None,
            keep_running: Arc::new(AtomicBool::new(true)),
            last_activity,
            exit: None,
            signal_plan: SignalPlan::default(),
        };

        if spec.keep_alive {
            if let Some(idle) = spec.idle_timeout {
                runner.watchdog = Some(runner.spawn_watchdog(idle));
            }
        }

        Ok(runner)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Still accepting work: not stopped, not timed out, not exited.
    pub fn is_running(&mut self) -> bool {
        if !self.keep_running.load(Ordering::SeqCst) || self.exit.is_some() {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one command line to stdin (keep-alive processes only).
    pub async fn send(&self, line: &str) -> Result<()> {
        if !self.keep_running.load(Ordering::SeqCst) {
            anyhow::bail!("process '{}' is stopped", self.command_line);
        }
        let mut guard = self.stdin.lock().await;
        let pipe = guard
            .as_mut()
            .with_context(|| format!("stdin of '{}' is closed", self.command_line))?;
        write_line(pipe, line)
            .await
            .with_context(|| format!("writing to '{}'", self.command_line))?;
        touch(&self.last_activity);
        Ok(())
    }

    /// Next merged output line; `None` once every pipe is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> ExitState {
        if let Some(ref exit) = self.exit {
            return exit.clone();
        }
        let exit = match self.child.wait().await {
            Ok(status) => ExitState::from_status(status),
            Err(e) => ExitState::failed(format!("waiting for '{}': {e}", self.command_line)),
        };
        debug!(cmd = %self.command_line, code = exit.internal_code, "process exited");
        self.exit = Some(exit.clone());
        exit
    }

    /// Close stdin, stop the whole process tree, and wait until the output
    /// readers have exited.
    pub async fn stop(&mut self) -> ExitState {
        self.keep_running.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        if let Some(pid) = self.pid {
            if matches!(self.child.try_wait(), Ok(None)) {
                let mut watcher = ProcessTreeWatcher::new(pid);
                let report = watcher.stop(&self.signal_plan).await;
                debug!(pid, signaled = ?report.signaled, "process tree stopped");
            }
        }
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.kill().await {
                warn!(cmd = %self.command_line, error = %e, "failed to kill process");
            }
        }

        let exit = self.wait().await;

        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if timeout(READER_DRAIN, reader).await.is_err() {
                warn!(cmd = %self.command_line, "output reader did not finish; aborting");
                abort.abort();
            }
        }
        self.lines.close();
        exit
    }

    fn spawn_watchdog(&self, idle: Duration) -> JoinHandle<()> {
        let keep_running = self.keep_running.clone();
        let last_activity = self.last_activity.clone();
        let stdin = self.stdin.clone();
        let pid = self.pid;
        let plan = self.signal_plan.clone();
        let command_line = self.command_line.clone();

        tokio::spawn(async move {
            loop {
                sleep(WATCHDOG_TICK).await;
                if !keep_running.load(Ordering::SeqCst) {
                    break;
                }
                let idle_for = last_activity
                    .lock()
                    .map(|t| t.elapsed())
                    .unwrap_or_else(|e| e.into_inner().elapsed());
                if idle_for < idle {
                    continue;
                }

                info!(cmd = %command_line, ?idle, "idle timeout reached; stopping process");
                keep_running.store(false, Ordering::SeqCst);
                stdin.lock().await.take();
                if let Some(pid) = pid {
                    ProcessTreeWatcher::new(pid).stop(&plan).await;
                }
                break;
            }
        })
    }
}

fn spawn_reader<R>(
    pipe: R,
    tx: mpsc::UnboundedSender<String>,
    last_activity: Arc<Mutex<Instant>>,
    stream: &'static str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    touch(&last_activity);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(stream, error = %e, "output reader stopped");
                    break;
                }
            }
        }
    })
}

async fn write_line(pipe: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    pipe.write_all(line.as_bytes()).await?;
    pipe.write_all(b"\n").await?;
    pipe.flush().await
}

fn touch(last_activity: &Mutex<Instant>) {
    match last_activity.lock() {
        Ok(mut t) => *t = Instant::now(),
        Err(e) => {
            let mut t = e.into_inner();
            *t = Instant::now();
        }
    }
}
