//! System-wide profile index
//!
//! Folds the system-wide sampler's raw output into one sample set per pid.
//! No scaling and no age gating happen here: the sampler has no per-process
//! attach cost, so every process it saw is kept.

use std::collections::btree_map::{self, BTreeMap};

use super::RawSample;
use crate::domain::Pid;
use crate::stacks::{ProcessSampleSet, Profile};

/// Per-pid system-wide samples for one cycle. Never error-flagged; a sampler
/// failure shows up as an empty index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemWideProfile {
    processes: BTreeMap<Pid, ProcessSampleSet>,
}

impl SystemWideProfile {
    /// Index `raw_samples` by pid, folding identical stacks within a pid.
    pub fn build<I>(raw_samples: I) -> Self
    where
        I: IntoIterator<Item = RawSample>,
    {
        let mut profiles: BTreeMap<Pid, Profile> = BTreeMap::new();
        for sample in raw_samples {
            if sample.count == 0 {
                continue;
            }
            profiles.entry(sample.pid).or_default().add(sample.stack, sample.count);
        }
        Self {
            processes: profiles
                .into_iter()
                .map(|(pid, profile)| (pid, ProcessSampleSet::from_profile(profile)))
                .collect(),
        }
    }

    /// The index for a cycle where the sampler produced nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessSampleSet> {
        self.processes.get(&pid)
    }

    /// Total samples for `pid`; zero when absent.
    pub fn total_for(&self, pid: Pid) -> u64 {
        self.get(pid).map_or(0, ProcessSampleSet::total_count)
    }

    /// Total samples across all pids.
    pub fn total(&self) -> u64 {
        self.processes.values().map(ProcessSampleSet::total_count).sum()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Pid, ProcessSampleSet> {
        self.processes.iter()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::Stack;

    fn sample(pid: u32, frames: &[&str], count: u64) -> RawSample {
        RawSample { pid: Pid(pid), stack: Stack::from_symbols(frames), count }
    }

    #[test]
    fn test_build_groups_by_pid_and_folds_stacks() {
        let index = SystemWideProfile::build(vec![
            sample(1, &["main", "a"], 3),
            sample(1, &["main", "a"], 2),
            sample(1, &["main", "b"], 1),
            sample(2, &["main"], 10),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.total_for(Pid(1)), 6);
        assert_eq!(index.total_for(Pid(2)), 10);
        assert_eq!(index.total(), 16);
        let first = index.get(Pid(1)).unwrap();
        assert!(!first.is_error());
        assert_eq!(first.profile().len(), 2);
        assert_eq!(first.profile().get(&Stack::from_symbols(&["main", "a"])), 5);
    }

    #[test]
    fn test_absent_pid_has_zero_total() {
        let index = SystemWideProfile::build(vec![sample(1, &["main"], 1)]);
        assert_eq!(index.total_for(Pid(99)), 0);
        assert!(index.get(Pid(99)).is_none());
    }

    #[test]
    fn test_zero_count_samples_do_not_create_entries() {
        let index = SystemWideProfile::build(vec![sample(5, &["main"], 0)]);
        assert!(index.is_empty());
        assert_eq!(SystemWideProfile::empty(), index);
    }
}
