use std::fmt;
use std::time::Duration;

/// Canonical target id type used throughout the engine.
pub type TargetId = String;

/// How a target invocation (or one of its blocks, or one script line) ended.
///
/// Only `CmdError` is a failure in the usual sense. Stop reasons and
/// requirement skips are normal control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetExit {
    Ok,
    /// Nothing was executed: no script lines and no `now` listener.
    NoCode,
    /// A process exited non-zero (or could not be started) and errors were
    /// not ignored.
    CmdError,
    /// Output scanning was halted deliberately by a stop reason or a
    /// listener with `stop = true`.
    ByStopReason,
    /// A single block was skipped by its own `requires`.
    ByRequirement,
    /// The target was started while already running and multi-run is off.
    AlreadyRunning,
    /// Blocks exist for the target, but every one was skipped.
    ByNothingToDo,
    /// No block at all is declared for the requested id.
    ByNoTargetExists,
}

impl TargetExit {
    /// Numeric code, stable for scripting around the CLI.
    pub fn code(self) -> i32 {
        match self {
            TargetExit::Ok => 0,
            TargetExit::NoCode => 1,
            TargetExit::CmdError => 2,
            TargetExit::ByStopReason => 3,
            TargetExit::ByRequirement => 4,
            TargetExit::AlreadyRunning => 5,
            TargetExit::ByNothingToDo => 6,
            TargetExit::ByNoTargetExists => 7,
        }
    }

    /// Whether a caller should treat this exit as an error.
    pub fn is_failure(self) -> bool {
        matches!(self, TargetExit::CmdError | TargetExit::ByNoTargetExists)
    }
}

impl fmt::Display for TargetExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetExit::Ok => "ok",
            TargetExit::NoCode => "no code",
            TargetExit::CmdError => "command error",
            TargetExit::ByStopReason => "stopped by reason",
            TargetExit::ByRequirement => "skipped by requirement",
            TargetExit::AlreadyRunning => "already running",
            TargetExit::ByNothingToDo => "nothing to do",
            TargetExit::ByNoTargetExists => "no such target",
        };
        f.write_str(s)
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration(" 2m "), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("4d").is_err());
    }

    #[test]
    fn only_cmd_error_and_missing_target_are_failures() {
        assert!(TargetExit::CmdError.is_failure());
        assert!(TargetExit::ByNoTargetExists.is_failure());
        assert!(!TargetExit::ByStopReason.is_failure());
        assert!(!TargetExit::ByNothingToDo.is_failure());
        assert_eq!(TargetExit::Ok.code(), 0);
    }
}
