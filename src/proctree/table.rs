//! Snapshot of the OS process table.
//!
//! - Linux: `/proc/<pid>/stat`, `/proc/<pid>/cmdline`, `/proc/<pid>/task`.
//! - Other Unix: `ps -A -o pid=,ppid=,stat=,command=`.
//! - Windows: `wmic process get ParentProcessId,ProcessId,CommandLine`.
//!
//! A snapshot is always read in full; nothing is patched incrementally.

use std::collections::HashMap;

use anyhow::Result;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub cmdline: String,
    /// Thread ids other than the main thread, where the OS exposes them.
    pub threads: Vec<u32>,
    pub zombie: bool,
}

/// Full process table keyed by pid.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: HashMap<u32, ProcessEntry>,
}

impl ProcessTable {
    pub fn from_entries(entries: impl IntoIterator<Item = ProcessEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.pid, e)).collect(),
        }
    }

    /// Read the current table from the OS.
    pub fn read() -> Result<Self> {
        Ok(Self::from_entries(platform::read_entries()?))
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    /// Live (non-zombie) direct children of `pid`, sorted by pid.
    pub fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .entries
            .values()
            .filter(|e| e.ppid == pid && e.pid != pid && !e.zombie)
            .map(|e| e.pid)
            .collect();
        children.sort_unstable();
        children
    }

    pub fn is_live(&self, pid: u32) -> bool {
        self.entries.get(&pid).is_some_and(|e| !e.zombie)
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs;
    use std::path::Path;

    use anyhow::{Context, Result};

    use super::ProcessEntry;

    pub fn read_entries() -> Result<Vec<ProcessEntry>> {
        let mut entries = Vec::new();
        for dir in fs::read_dir("/proc").context("reading /proc")? {
            let Ok(dir) = dir else { continue };
            let Some(pid) = dir.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes vanish between readdir and read; skip those.
            if let Some(entry) = read_entry(pid) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn read_entry(pid: u32) -> Option<ProcessEntry> {
        let base = Path::new("/proc").join(pid.to_string());
        let stat = fs::read_to_string(base.join("stat")).ok()?;
        let (comm, state, ppid) = parse_stat(&stat)?;

        let cmdline = fs::read(base.join("cmdline"))
            .ok()
            .map(|raw| {
                raw.split(|b| *b == 0)
                    .filter(|part| !part.is_empty())
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("[{comm}]"));

        let mut threads: Vec<u32> = fs::read_dir(base.join("task"))
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
                    .filter(|tid| *tid != pid)
                    .collect()
            })
            .unwrap_or_default();
        threads.sort_unstable();

        Some(ProcessEntry {
            pid,
            ppid,
            cmdline,
            threads,
            zombie: state == 'Z' || state == 'X',
        })
    }

    /// Parse `pid (comm) state ppid ...`; `comm` may contain spaces and
    /// parentheses, so split at the last `)`.
    pub fn parse_stat(stat: &str) -> Option<(String, char, u32)> {
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let comm = stat.get(open + 1..close)?.to_string();
        let mut rest = stat.get(close + 1..)?.split_whitespace();
        let state = rest.next()?.chars().next()?;
        let ppid = rest.next()?.parse().ok()?;
        Some((comm, state, ppid))
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use std::process::Command;

    use anyhow::{Context, Result};

    use super::ProcessEntry;

    pub fn read_entries() -> Result<Vec<ProcessEntry>> {
        let out = Command::new("ps")
            .args(["-A", "-o", "pid=,ppid=,stat=,command="])
            .output()
            .context("running ps")?;
        let text = String::from_utf8_lossy(&out.stdout);
        Ok(text.lines().filter_map(parse_ps_line).collect())
    }

    fn parse_ps_line(line: &str) -> Option<ProcessEntry> {
        let mut parts = line.split_whitespace();
        let pid = parts.next()?.parse().ok()?;
        let ppid = parts.next()?.parse().ok()?;
        let stat = parts.next()?;
        let cmdline = parts.collect::<Vec<_>>().join(" ");
        Some(ProcessEntry {
            pid,
            ppid,
            cmdline,
            threads: Vec::new(),
            zombie: stat.starts_with('Z'),
        })
    }
}

#[cfg(windows)]
mod platform {
    use std::process::Command;

    use anyhow::{Context, Result};

    use super::ProcessEntry;

    pub fn read_entries() -> Result<Vec<ProcessEntry>> {
        let out = Command::new("wmic")
            .args([
                "process",
                "get",
                "CommandLine,ParentProcessId,ProcessId",
                "/format:csv",
            ])
            .output()
            .context("running wmic")?;
        let text = String::from_utf8_lossy(&out.stdout);
        Ok(text.lines().filter_map(parse_csv_line).collect())
    }

    /// `Node,CommandLine,ParentProcessId,ProcessId`; the command line may
    /// itself contain commas, so the numeric columns are taken from the end.
    fn parse_csv_line(line: &str) -> Option<ProcessEntry> {
        let line = line.trim();
        let mut parts = line.rsplitn(3, ',');
        let pid = parts.next()?.trim().parse().ok()?;
        let ppid = parts.next()?.trim().parse().ok()?;
        let head = parts.next()?;
        let cmdline = head.split_once(',').map(|(_, c)| c).unwrap_or("").to_string();
        Some(ProcessEntry {
            pid,
            ppid,
            cmdline,
            threads: Vec::new(),
            zombie: false,
        })
    }
}

/// Read a single entry without scanning the whole table, where possible.
pub fn read_entry(pid: u32) -> Option<ProcessEntry> {
    #[cfg(target_os = "linux")]
    {
        platform::read_entry(pid)
    }
    #[cfg(not(target_os = "linux"))]
    {
        ProcessTable::read().ok()?.get(pid).cloned()
    }
}
