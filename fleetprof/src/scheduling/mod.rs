//! Process selection for runtime-level profiling
//!
//! Each cycle the scheduler refreshes the age tracker from the discovery
//! snapshot, drops processes that are too young, and partitions the rest by
//! detected runtime so every runtime profiler receives only its own pids.

pub mod age_gate;

use std::collections::BTreeMap;

pub use age_gate::{AgeGate, AgeTracker};

use crate::domain::{Pid, RuntimeKind, Timestamp};
use crate::process_lookup::ProcessInfo;

/// Result of gating one discovery snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Eligible pids per runtime, sorted ascending.
    pub by_runtime: BTreeMap<RuntimeKind, Vec<Pid>>,
    /// Runtime processes skipped for being younger than the threshold (or
    /// of unknown age).
    pub skipped_young: Vec<Pid>,
    /// Processes with no detected runtime; covered by the system-wide sampler only.
    pub native_only: usize,
}

impl Selection {
    pub fn eligible_count(&self) -> usize {
        self.by_runtime.values().map(Vec::len).sum()
    }
}

/// Refresh `tracker` from `processes` and select the eligible runtime pids.
pub fn select_eligible(
    processes: &[ProcessInfo],
    tracker: &mut AgeTracker,
    now: Timestamp,
) -> Selection {
    tracker.refresh(processes);

    let mut selection = Selection::default();
    for process in processes {
        let Some(runtime) = process.runtime else {
            selection.native_only += 1;
            continue;
        };
        if tracker.is_eligible(process.pid, now) {
            selection.by_runtime.entry(runtime).or_default().push(process.pid);
        } else {
            selection.skipped_young.push(process.pid);
        }
    }

    for pids in selection.by_runtime.values_mut() {
        pids.sort_unstable();
        pids.dedup();
    }
    selection.skipped_young.sort_unstable();
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn process(pid: u32, runtime: Option<RuntimeKind>, start_secs: f64) -> ProcessInfo {
        ProcessInfo {
            pid: Pid(pid),
            command: format!("proc{pid}"),
            runtime,
            start_time: Some(Timestamp::from_secs_f64(start_secs)),
        }
    }

    #[test]
    fn test_partitions_by_runtime_and_skips_young() {
        let mut tracker = AgeTracker::new(AgeGate::new(Duration::from_secs(10)));
        let processes = vec![
            process(30, Some(RuntimeKind::Python), 0.0),
            process(10, Some(RuntimeKind::Python), 10.0),
            process(20, Some(RuntimeKind::Java), 0.0),
            process(40, Some(RuntimeKind::Ruby), 95.0), // 5s old
            process(50, None, 0.0),
        ];

        let selection = select_eligible(&processes, &mut tracker, Timestamp::from_secs_f64(100.0));

        assert_eq!(selection.by_runtime[&RuntimeKind::Python], vec![Pid(10), Pid(30)]);
        assert_eq!(selection.by_runtime[&RuntimeKind::Java], vec![Pid(20)]);
        assert!(!selection.by_runtime.contains_key(&RuntimeKind::Ruby));
        assert_eq!(selection.skipped_young, vec![Pid(40)]);
        assert_eq!(selection.native_only, 1);
        assert_eq!(selection.eligible_count(), 3);
    }

    #[test]
    fn test_vanished_runtime_process_is_skipped() {
        let mut tracker = AgeTracker::new(AgeGate::new(Duration::from_secs(10)));
        let mut vanished = process(60, Some(RuntimeKind::Node), 0.0);
        vanished.start_time = None;

        let selection = select_eligible(&[vanished], &mut tracker, Timestamp::from_secs_f64(100.0));

        assert_eq!(selection.eligible_count(), 0);
        assert_eq!(selection.skipped_young, vec![Pid(60)]);
    }
}
