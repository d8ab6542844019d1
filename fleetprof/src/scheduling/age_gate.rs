//! Process age gate
//!
//! Runtime profilers attach to a process and read its memory for the whole
//! sampling window. A process that exits mid-window makes that attach or
//! read fail, so processes younger than `min_duration` are skipped for the
//! cycle. The system-wide sampler is not gated.

use log::debug;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{Pid, Timestamp};
use crate::process_lookup::ProcessInfo;

/// Pure age threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeGate {
    min_duration: Duration,
}

impl AgeGate {
    pub fn new(min_duration: Duration) -> Self {
        Self { min_duration }
    }

    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    /// Eligible iff `now - created >= min_duration`; the boundary is eligible.
    ///
    /// A creation time in the future (clock skew between readings) counts as
    /// age zero.
    pub fn is_old_enough(&self, created: Timestamp, now: Timestamp) -> bool {
        now.saturating_since(created) >= self.min_duration
    }
}

/// Creation times for the processes alive in the current cycle.
///
/// Rebuilt from each discovery snapshot: dead pids disappear and a reused pid
/// picks up its new creation time, so an entry is only ever valid for the
/// (pid, creation time) pair it was read with.
#[derive(Debug, Clone)]
pub struct AgeTracker {
    gate: AgeGate,
    created: HashMap<Pid, Timestamp>,
}

impl AgeTracker {
    pub fn new(gate: AgeGate) -> Self {
        Self { gate, created: HashMap::new() }
    }

    /// Replace tracked creation times with those from `processes`.
    ///
    /// Processes without a readable creation time are left untracked and
    /// therefore ineligible.
    pub fn refresh(&mut self, processes: &[ProcessInfo]) {
        let mut next = HashMap::with_capacity(processes.len());
        let mut reused = 0usize;
        for process in processes {
            let Some(start) = process.start_time else {
                continue;
            };
            if self.created.get(&process.pid).is_some_and(|&old| old != start) {
                reused += 1;
            }
            next.insert(process.pid, start);
        }
        let dropped = self.created.keys().filter(|pid| !next.contains_key(*pid)).count();
        debug!(
            "Age tracker refreshed: {} tracked, {dropped} dropped, {reused} reused pids",
            next.len()
        );
        self.created = next;
    }

    pub fn creation_time(&self, pid: Pid) -> Option<Timestamp> {
        self.created.get(&pid).copied()
    }

    /// Unknown pids (vanished before their age could be read) are ineligible.
    pub fn is_eligible(&self, pid: Pid, now: Timestamp) -> bool {
        self.creation_time(pid).is_some_and(|created| self.gate.is_old_enough(created, now))
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}
