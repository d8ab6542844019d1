//! Process discovery from `/proc`.
//!
//! Enumerates live processes with their command name, detected runtime and
//! creation time. Creation times come from field 22 of `/proc/<pid>/stat`
//! (clock ticks since boot) and "now" from `/proc/uptime`, so both live on
//! the same monotonic since-boot clock.

#![allow(unsafe_code)] // sysconf() requires unsafe

use log::debug;
use std::fs;
use std::path::PathBuf;

use crate::domain::{Pid, ProfilerError, RuntimeKind, Timestamp};

/// Fallback when `sysconf(_SC_CLK_TCK)` is unavailable; the Linux default.
const DEFAULT_CLOCK_TICKS: u64 = 100;

/// Index of `starttime` among the fields following the `(comm)` entry.
const STARTTIME_FIELD_AFTER_COMM: usize = 19;

/// One live process as seen by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub command: String,
    pub runtime: Option<RuntimeKind>,
    /// `None` when the process vanished before its stat could be read.
    pub start_time: Option<Timestamp>,
}

/// Source of per-cycle process snapshots.
pub trait ProcessSource: Send + Sync {
    /// Enumerate live processes.
    ///
    /// # Errors
    /// Fails only when the process table itself cannot be read; per-process
    /// read failures are reflected in the returned entries.
    fn snapshot(&self) -> Result<Vec<ProcessInfo>, ProfilerError>;

    /// Current time on the same clock as `ProcessInfo::start_time`.
    ///
    /// # Errors
    /// Fails when the clock source cannot be read.
    fn now(&self) -> Result<Timestamp, ProfilerError>;
}

/// `/proc`-backed process source.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    clock_ticks: u64,
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc", system_clock_ticks())
    }

    /// Read from an alternative procfs mount (tests, containers).
    pub fn with_root(root: impl Into<PathBuf>, clock_ticks: u64) -> Self {
        Self { root: root.into(), clock_ticks: clock_ticks.max(1) }
    }

    fn read_process(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());

        let exe_path = fs::read_link(dir.join("exe")).ok();

        let stat = fs::read_to_string(dir.join("stat")).ok();
        let (command, start_time) = match stat.as_deref().map(|s| parse_stat(s, self.clock_ticks)) {
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                debug!("Skipping pid {pid}: {e}");
                return None;
            }
            // Vanished between readdir and stat
            None => (String::new(), None),
        };

        // Kernel threads (no exe link) have nothing to profile at runtime level
        let runtime = exe_path.as_deref().and_then(|exe| {
            let exe_basename = exe.file_name().and_then(|n| n.to_str()).unwrap_or("");
            classify_runtime(&command, exe_basename)
        });

        Some(ProcessInfo { pid: Pid(pid), command, runtime, start_time })
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcFs {
    fn snapshot(&self) -> Result<Vec<ProcessInfo>, ProfilerError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            ProfilerError::DiscoveryFailed(format!("{}: {e}", self.root.display()))
        })?;

        let mut processes: Vec<ProcessInfo> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter_map(|pid| self.read_process(pid))
            .collect();
        processes.sort_unstable_by_key(|p| p.pid);
        Ok(processes)
    }

    fn now(&self) -> Result<Timestamp, ProfilerError> {
        let uptime = fs::read_to_string(self.root.join("uptime"))?;
        parse_uptime(&uptime)
    }
}

fn system_clock_ticks() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    u64::try_from(ticks).ok().filter(|&t| t > 0).unwrap_or(DEFAULT_CLOCK_TICKS)
}

/// Extract command name and creation time from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ppid ... starttime ..."
fn parse_stat(stat_line: &str, clock_ticks: u64) -> Result<(String, Option<Timestamp>), String> {
    let open = stat_line.find('(').ok_or("Invalid stat format")?;
    let close = stat_line.rfind(')').ok_or("Invalid stat format")?;
    if open >= close {
        return Err("Invalid stat format".to_string());
    }
    let command = stat_line[open + 1..close].to_string();

    let start_time = stat_line[close + 1..]
        .split_whitespace()
        .nth(STARTTIME_FIELD_AFTER_COMM)
        .and_then(|ticks| ticks.parse::<u64>().ok())
        .map(|ticks| {
            let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(clock_ticks);
            Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
        });

    Ok((command, start_time))
}

/// First field of `/proc/uptime`: seconds since boot.
fn parse_uptime(content: &str) -> Result<Timestamp, ProfilerError> {
    content
        .split_whitespace()
        .next()
        .and_then(|secs| secs.parse::<f64>().ok())
        .map(Timestamp::from_secs_f64)
        .ok_or_else(|| ProfilerError::DiscoveryFailed(format!("Invalid uptime: {content:?}")))
}

/// Map a command name / executable basename to the runtime it runs.
pub fn classify_runtime(command: &str, exe_basename: &str) -> Option<RuntimeKind> {
    [exe_basename, command].into_iter().filter(|name| !name.is_empty()).find_map(|name| {
        if name.starts_with("python") || name == "uwsgi" || name == "gunicorn" {
            Some(RuntimeKind::Python)
        } else if name == "java" {
            Some(RuntimeKind::Java)
        } else if name.starts_with("ruby") {
            Some(RuntimeKind::Ruby)
        } else if name == "node" || name == "nodejs" {
            Some(RuntimeKind::Node)
        } else if name.starts_with("php") {
            Some(RuntimeKind::Php)
        } else if name == "dotnet" {
            Some(RuntimeKind::Dotnet)
        } else {
            None
        }
    })
}
