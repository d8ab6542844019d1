//! # Merge Engine
//!
//! Reconciles one process's runtime-profiler samples with the system-wide
//! sampler's samples for the same cycle.
//!
//! The two sources sample independently and at different rates. The
//! system-wide count for a pid is the trusted measure of how much CPU the
//! process used; the runtime profiler's stacks are the trusted description of
//! *where* it was spent. Merging reweights the runtime shape by the
//! system-wide total whenever that total is usable.
//!
//! ## Decision Table
//!
//! With `perf = system_wide.total_for(pid)` and `prof = runtime.total_count()`,
//! first match wins:
//!
//! | # | Condition                      | Output                                         |
//! |---|--------------------------------|------------------------------------------------|
//! | 1 | `perf > 0`, runtime is error   | system-wide stacks + error frame at leaf, unscaled |
//! | 2 | `perf > 0`                     | runtime stacks × `perf / prof`, rounded half-up |
//! | 3 | `perf == 0`                    | runtime stacks unchanged                        |
//!
//! Case 3 is what keeps runtime data alive when the system-wide sampler
//! collapses for a cycle: a zero total carries no reweighting information, so
//! a ratio is never computed from it. Case 2 with `prof == 0` yields an empty
//! profile instead of dividing by zero.
//!
//! Merging is a pure function of its inputs.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{Pid, RuntimeKind};
use crate::profilers::SystemWideProfile;
use crate::stacks::{ErrorMarker, Frame, ProcessSampleSet, Profile};

/// Which rule produced a process's merged profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Runtime profiler failed; native stacks annotated with its error.
    ErrorWithBacking,
    /// Runtime stacks reweighted to the system-wide total.
    Scaled,
    /// System-wide total was zero; runtime stacks kept as reported.
    Unscaled,
    /// No runtime result for the pid; system-wide stacks kept as reported.
    SystemOnly,
}

/// Merge one process, returning only the profile.
pub fn merge(pid: Pid, runtime: &ProcessSampleSet, system_wide: &SystemWideProfile) -> Profile {
    merge_process(pid, runtime, system_wide).1
}

/// Merge one process, also reporting which rule applied.
pub fn merge_process(
    pid: Pid,
    runtime: &ProcessSampleSet,
    system_wide: &SystemWideProfile,
) -> (MergeOutcome, Profile) {
    let perf_count = system_wide.total_for(pid);
    let profile_count = runtime.total_count();

    if perf_count > 0 && runtime.is_error() {
        if let (Some(backing), Some(marker)) = (system_wide.get(pid), runtime.primary_error()) {
            return (MergeOutcome::ErrorWithBacking, attach_error(backing.profile(), marker));
        }
    }

    if perf_count > 0 {
        if profile_count == 0 {
            // A process can legitimately sleep through the whole window
            return (MergeOutcome::Scaled, Profile::new());
        }
        return (
            MergeOutcome::Scaled,
            scale_sample_counts(runtime.profile(), perf_count, profile_count),
        );
    }

    (MergeOutcome::Unscaled, runtime.profile().clone())
}

/// Every stack of `native` with `marker` appended at the leaf, counts kept.
pub fn attach_error(native: &Profile, marker: &ErrorMarker) -> Profile {
    native
        .iter()
        .map(|(stack, &count)| (stack.with_leaf(Frame::Error(marker.clone())), count))
        .collect()
}

/// Multiply every count by `numerator / denominator`, rounding half up per
/// stack. Stacks that round to zero are dropped.
///
/// Rounding is independent per stack, so the result's total differs from
/// `total × ratio` by at most half a sample per distinct stack.
///
/// # Panics
/// Panics if `denominator` is zero; callers guard it.
pub fn scale_sample_counts(profile: &Profile, numerator: u64, denominator: u64) -> Profile {
    assert!(denominator > 0, "scale denominator must be positive");
    if numerator == denominator {
        return profile.clone();
    }
    let num = u128::from(numerator);
    let den = u128::from(denominator);
    profile
        .iter()
        .map(|(stack, &count)| {
            let scaled = (u128::from(count) * num * 2 + den) / (2 * den);
            (stack.clone(), u64::try_from(scaled).unwrap_or(u64::MAX))
        })
        .collect()
}

/// One process's contribution to a merged cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBreakdown {
    pub outcome: MergeOutcome,
    pub profile: Profile,
    /// Runtime profiler total before merging (0 for `SystemOnly`).
    pub runtime_total: u64,
    /// System-wide total for the pid.
    pub system_total: u64,
    pub command: Option<String>,
    pub runtime: Option<RuntimeKind>,
}

/// The output of one cycle: the aggregate plus the per-process breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedProfile {
    pub aggregate: Profile,
    pub processes: BTreeMap<Pid, ProcessBreakdown>,
}

impl MergedProfile {
    /// Merge every runtime result against `system_wide` and fold in the
    /// system-wide entries of pids with no runtime result.
    pub fn build(
        runtime_results: &BTreeMap<Pid, ProcessSampleSet>,
        system_wide: &SystemWideProfile,
    ) -> Self {
        let mut merged = MergedProfile::default();

        for (&pid, runtime) in runtime_results {
            let (outcome, profile) = merge_process(pid, runtime, system_wide);
            merged.insert(
                pid,
                ProcessBreakdown {
                    outcome,
                    profile,
                    runtime_total: runtime.total_count(),
                    system_total: system_wide.total_for(pid),
                    command: None,
                    runtime: None,
                },
            );
        }

        for (pid, native) in system_wide.iter() {
            if runtime_results.contains_key(pid) {
                continue;
            }
            merged.insert(
                *pid,
                ProcessBreakdown {
                    outcome: MergeOutcome::SystemOnly,
                    profile: native.profile().clone(),
                    runtime_total: 0,
                    system_total: native.total_count(),
                    command: None,
                    runtime: None,
                },
            );
        }

        merged
    }

    fn insert(&mut self, pid: Pid, breakdown: ProcessBreakdown) {
        self.aggregate.merge_from(&breakdown.profile);
        self.processes.insert(pid, breakdown);
    }

    /// Attach discovery metadata to a process's breakdown.
    pub fn label(&mut self, pid: Pid, command: &str, runtime: Option<RuntimeKind>) {
        if let Some(breakdown) = self.processes.get_mut(&pid) {
            breakdown.command = Some(command.to_string());
            breakdown.runtime = runtime;
        }
    }

    /// Number of processes per merge rule.
    pub fn outcome_counts(&self) -> BTreeMap<MergeOutcome, usize> {
        let mut counts = BTreeMap::new();
        for breakdown in self.processes.values() {
            *counts.entry(breakdown.outcome).or_insert(0) += 1;
        }
        counts
    }

    pub fn total(&self) -> u64 {
        self.aggregate.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profilers::RawSample;
    use crate::stacks::Stack;

    fn profile(entries: &[(&[&str], u64)]) -> Profile {
        entries.iter().map(|(frames, count)| (Stack::from_symbols(frames), *count)).collect()
    }

    fn system_wide(pid: u32, entries: &[(&[&str], u64)]) -> SystemWideProfile {
        SystemWideProfile::build(entries.iter().map(|(frames, count)| RawSample {
            pid: Pid(pid),
            stack: Stack::from_symbols(frames),
            count: *count,
        }))
    }

    #[test]
    fn test_zero_perf_preserves_runtime_stacks() {
        // GPU-style failure: the system-wide sampler produced nothing
        let runtime = ProcessSampleSet::from_profile(profile(&[(&["A"], 800)]));
        let (outcome, merged) = merge_process(Pid(1), &runtime, &SystemWideProfile::empty());
        assert_eq!(outcome, MergeOutcome::Unscaled);
        assert_eq!(merged, profile(&[(&["A"], 800)]));
    }

    #[test]
    fn test_scaling_preserves_shape() {
        let runtime = ProcessSampleSet::from_profile(profile(&[(&["A"], 100), (&["B"], 50)]));
        let sw = system_wide(1, &[(&["native"], 300)]);
        let (outcome, merged) = merge_process(Pid(1), &runtime, &sw);
        assert_eq!(outcome, MergeOutcome::Scaled);
        assert_eq!(merged.get(&Stack::from_symbols(&["A"])), 200);
        assert_eq!(merged.get(&Stack::from_symbols(&["B"])), 100);
        assert_eq!(merged.total(), 300);
    }

    #[test]
    fn test_error_with_backing_annotates_native_stacks() {
        let runtime = ProcessSampleSet::error(ErrorMarker::new("segfault"));
        let sw = system_wide(1, &[(&["X", "Y"], 50)]);
        let (outcome, merged) = merge_process(Pid(1), &runtime, &sw);

        assert_eq!(outcome, MergeOutcome::ErrorWithBacking);
        assert_eq!(merged.len(), 1);
        let (stack, &count) = merged.iter().next().unwrap();
        assert_eq!(stack.to_string(), "X;Y;[error:segfault]");
        assert_eq!(count, 50);
    }

    #[test]
    fn test_error_without_backing_passes_error_through() {
        let runtime = ProcessSampleSet::error(ErrorMarker::new("exited"));
        let merged = merge(Pid(1), &runtime, &system_wide(2, &[(&["other"], 9)]));
        assert_eq!(merged, runtime.profile().clone());
        assert!(merged.only_error_stacks());
    }

    #[test]
    fn test_empty_runtime_with_perf_is_empty_contribution() {
        let runtime = ProcessSampleSet::from_profile(Profile::new());
        let (outcome, merged) = merge_process(Pid(1), &runtime, &system_wide(1, &[(&["x"], 40)]));
        assert_eq!(outcome, MergeOutcome::Scaled);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_scale_rounds_half_up_and_drops_zeros() {
        let input = profile(&[(&["a"], 1), (&["b"], 3), (&["c"], 5)]);
        // ratio 1/2: 0.5 → 1, 1.5 → 2, 2.5 → 3
        let scaled = scale_sample_counts(&input, 1, 2);
        assert_eq!(scaled.get(&Stack::from_symbols(&["a"])), 1);
        assert_eq!(scaled.get(&Stack::from_symbols(&["b"])), 2);
        assert_eq!(scaled.get(&Stack::from_symbols(&["c"])), 3);

        // ratio 1/10: 0.1 rounds to zero and is not stored
        let scaled = scale_sample_counts(&input, 1, 10);
        assert_eq!(scaled.len(), 1);
        assert_eq!(scaled.get(&Stack::from_symbols(&["c"])), 1);
    }

    #[test]
    fn test_scale_handles_large_counts() {
        let input = profile(&[(&["a"], u64::MAX / 2)]);
        let scaled = scale_sample_counts(&input, 2, 1);
        assert_eq!(scaled.get(&Stack::from_symbols(&["a"])), u64::MAX - 1);
    }

    #[test]
    fn test_merge_is_pure() {
        let runtime = ProcessSampleSet::from_profile(profile(&[(&["a"], 7), (&["b"], 13)]));
        let sw = system_wide(1, &[(&["x"], 29)]);
        assert_eq!(merge(Pid(1), &runtime, &sw), merge(Pid(1), &runtime, &sw));
    }

    #[test]
    fn test_build_aggregates_without_double_counting() {
        let mut runtime_results = BTreeMap::new();
        runtime_results.insert(Pid(1), ProcessSampleSet::from_profile(profile(&[(&["py", "f"], 10)])));
        let sw = SystemWideProfile::build(vec![
            RawSample { pid: Pid(1), stack: Stack::from_symbols(&["native1"]), count: 20 },
            RawSample { pid: Pid(2), stack: Stack::from_symbols(&["native2"]), count: 5 },
        ]);

        let mut merged = MergedProfile::build(&runtime_results, &sw);
        merged.label(Pid(1), "python3", Some(RuntimeKind::Python));

        // pid 1 scaled to 20, pid 2 carried over; native1 is not counted again
        assert_eq!(merged.total(), 25);
        assert_eq!(merged.aggregate.get(&Stack::from_symbols(&["py", "f"])), 20);
        assert_eq!(merged.aggregate.get(&Stack::from_symbols(&["native1"])), 0);
        assert_eq!(merged.aggregate.get(&Stack::from_symbols(&["native2"])), 5);
        assert_eq!(merged.processes[&Pid(2)].outcome, MergeOutcome::SystemOnly);
        assert_eq!(merged.processes[&Pid(1)].command.as_deref(), Some("python3"));
        assert_eq!(merged.processes[&Pid(1)].runtime_total, 10);
        assert_eq!(merged.processes[&Pid(1)].system_total, 20);

        let counts = merged.outcome_counts();
        assert_eq!(counts[&MergeOutcome::Scaled], 1);
        assert_eq!(counts[&MergeOutcome::SystemOnly], 1);
    }
}
