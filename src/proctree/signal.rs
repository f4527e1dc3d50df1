//! Platform signal delivery and liveness probing.

use std::fmt;
use std::time::Duration;

/// Platform-neutral stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT on Unix, a plain `taskkill` on Windows.
    Interrupt,
    /// SIGTERM on Unix, a plain `taskkill` on Windows.
    Terminate,
    /// SIGKILL on Unix, `taskkill /F` on Windows.
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Interrupt => f.write_str("interrupt"),
            StopSignal::Terminate => f.write_str("terminate"),
            StopSignal::Kill => f.write_str("kill"),
        }
    }
}

/// One step of a shutdown: send `signal`, then give the process up to
/// `wait` to disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalStep {
    pub signal: StopSignal,
    pub wait: Duration,
}

/// Ordered escalation used when stopping a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPlan {
    pub steps: Vec<SignalStep>,
}

impl SignalPlan {
    pub fn new(steps: Vec<SignalStep>) -> Self {
        Self { steps }
    }
}

impl Default for SignalPlan {
    /// Interrupt and wait 800ms, then kill and wait 20ms.
    fn default() -> Self {
        Self {
            steps: vec![
                SignalStep {
                    signal: StopSignal::Interrupt,
                    wait: Duration::from_millis(800),
                },
                SignalStep {
                    signal: StopSignal::Kill,
                    wait: Duration::from_millis(20),
                },
            ],
        }
    }
}

/// Deliver `signal` to `pid`. A process that is already gone is not an
/// error.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        StopSignal::Interrupt => Signal::SIGINT,
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    let raw = i32::try_from(pid).map_err(|_| std::io::Error::other(format!("pid {pid} out of range")))?;
    match kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(windows)]
pub fn send_signal(pid: u32, signal: StopSignal) -> std::io::Result<()> {
    use std::process::{Command, Stdio};

    let mut cmd = Command::new("taskkill");
    if signal == StopSignal::Kill {
        cmd.arg("/F");
    }
    cmd.arg("/PID")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
}

/// Ask the OS whether `pid` is still a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        super::table::read_entry(pid).is_some_and(|e| !e.zombie)
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(raw), None).is_ok()
            && super::table::read_entry(pid).is_some_and(|e| !e.zombie)
    }
    #[cfg(windows)]
    {
        super::table::read_entry(pid).is_some()
    }
}
