//! Stack-to-count profiles and per-process sample sets.

use std::collections::btree_map::{self, BTreeMap};

use super::frame::ErrorMarker;
use super::stack::Stack;

/// Mapping from stack to sample count.
///
/// Zero counts are never stored and the total is cached, so `total()` is
/// O(1). A `BTreeMap` keeps iteration (and therefore rendered output)
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    stacks: BTreeMap<Stack, u64>,
    total: u64,
}

impl Profile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` samples for `stack`. Adding zero is a no-op.
    pub fn add(&mut self, stack: Stack, count: u64) {
        if count == 0 {
            return;
        }
        *self.stacks.entry(stack).or_insert(0) += count;
        self.total += count;
    }

    /// Fold every entry of `other` into this profile.
    pub fn merge_from(&mut self, other: &Profile) {
        for (stack, &count) in &other.stacks {
            self.add(stack.clone(), count);
        }
    }

    pub fn get(&self, stack: &Stack) -> u64 {
        self.stacks.get(stack).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Stack, u64> {
        self.stacks.iter()
    }

    pub fn stacks(&self) -> btree_map::Keys<'_, Stack, u64> {
        self.stacks.keys()
    }

    /// True when every stored stack is an error stack (vacuously true when empty).
    pub fn only_error_stacks(&self) -> bool {
        self.stacks.keys().all(Stack::is_error_stack)
    }
}

impl FromIterator<(Stack, u64)> for Profile {
    fn from_iter<T: IntoIterator<Item = (Stack, u64)>>(iter: T) -> Self {
        let mut profile = Profile::new();
        for (stack, count) in iter {
            profile.add(stack, count);
        }
        profile
    }
}

impl<'a> IntoIterator for &'a Profile {
    type Item = (&'a Stack, &'a u64);
    type IntoIter = btree_map::Iter<'a, Stack, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.stacks.iter()
    }
}

impl IntoIterator for Profile {
    type Item = (Stack, u64);
    type IntoIter = btree_map::IntoIter<Stack, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.stacks.into_iter()
    }
}

/// One process's samples from a single source for a single cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSampleSet {
    profile: Profile,
    is_error: bool,
}

impl ProcessSampleSet {
    /// A normal (non-error) sample set.
    pub fn from_profile(profile: Profile) -> Self {
        Self { profile, is_error: false }
    }

    /// An error-flagged set holding a single error stack with one sample.
    pub fn error(marker: ErrorMarker) -> Self {
        Self::error_with_count(marker, 1)
    }

    /// An error-flagged set whose error stack stands in for `count` attempts.
    ///
    /// The count is clamped to at least one so the marker is always stored.
    pub fn error_with_count(marker: ErrorMarker, count: u64) -> Self {
        let mut profile = Profile::new();
        profile.add(Stack::error(marker), count.max(1));
        Self { profile, is_error: true }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn total_count(&self) -> u64 {
        self.profile.total()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn into_profile(self) -> Profile {
        self.profile
    }

    /// The marker carried by the most frequent error stack, ties broken by
    /// stack order.
    pub fn primary_error(&self) -> Option<&ErrorMarker> {
        if !self.is_error {
            return None;
        }
        self.profile
            .iter()
            .filter_map(|(stack, &count)| stack.error_marker().map(|m| (m, count)))
            .fold(None, |best: Option<(&ErrorMarker, u64)>, (marker, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((marker, count)),
            })
            .map(|(marker, _)| marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_folds_identical_stacks() {
        let mut profile = Profile::new();
        profile.add(Stack::from_symbols(&["main", "a"]), 3);
        profile.add(Stack::from_symbols(&["main", "a"]), 2);
        profile.add(Stack::from_symbols(&["main", "b"]), 1);
        assert_eq!(profile.len(), 2);
        assert_eq!(profile.total(), 6);
        assert_eq!(profile.get(&Stack::from_symbols(&["main", "a"])), 5);
    }

    #[test]
    fn test_zero_counts_never_stored() {
        let mut profile = Profile::new();
        profile.add(Stack::from_symbols(&["main"]), 0);
        assert!(profile.is_empty());
        assert_eq!(profile.total(), 0);
    }

    #[test]
    fn test_merge_from_sums_counts() {
        let mut a: Profile = [(Stack::from_symbols(&["x"]), 1)].into_iter().collect();
        let b: Profile = [(Stack::from_symbols(&["x"]), 4), (Stack::from_symbols(&["y"]), 2)]
            .into_iter()
            .collect();
        a.merge_from(&b);
        assert_eq!(a.get(&Stack::from_symbols(&["x"])), 5);
        assert_eq!(a.total(), 7);
    }

    #[test]
    fn test_error_set() {
        let set = ProcessSampleSet::error_with_count(ErrorMarker::new("timeout"), 0);
        assert!(set.is_error());
        assert_eq!(set.total_count(), 1);
        assert!(set.profile().only_error_stacks());
        assert_eq!(set.primary_error().map(ErrorMarker::kind), Some("timeout"));
    }

    #[test]
    fn test_primary_error_prefers_most_frequent() {
        let mut profile = Profile::new();
        profile.add(Stack::error(ErrorMarker::new("attach")), 1);
        profile.add(Stack::error(ErrorMarker::new("exited")), 7);
        let set = ProcessSampleSet { profile, is_error: true };
        assert_eq!(set.primary_error().map(ErrorMarker::kind), Some("exited"));
    }

    #[test]
    fn test_normal_set_has_no_primary_error() {
        let set = ProcessSampleSet::from_profile(
            [(Stack::from_symbols(&["main"]), 3)].into_iter().collect(),
        );
        assert!(!set.is_error());
        assert_eq!(set.total_count(), 3);
        assert!(set.primary_error().is_none());
    }
}
