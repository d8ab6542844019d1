//! # Cycle Orchestrator
//!
//! Drives one sampling cycle end to end:
//!
//! ```text
//! Idle → Gating → Collecting → Merging → Emitting → Idle
//! ```
//!
//! - **Gating**: snapshot processes, refresh the age tracker, partition
//!   eligible pids by runtime
//! - **Collecting**: the system-wide sampler and every runtime profiler run
//!   concurrently on the blocking pool, each bounded by
//!   `cycle_duration + grace_period`
//! - **Merging**: per-pid merge plus aggregate
//! - **Emitting**: hand the result to the sink
//!
//! A source that times out is abandoned, not killed; its result is
//! discarded. Sources own their subprocesses and must stop them at the same
//! deadline (the command-backed sources kill their child).

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinSet;

use crate::config::CycleConfig;
use crate::domain::{Pid, ProfilerError, RuntimeKind, Timestamp};
use crate::export::{CycleMetadata, ProfileSink};
use crate::merge::{MergeOutcome, MergedProfile};
use crate::process_lookup::{ProcessInfo, ProcessSource};
use crate::profilers::{
    error_marker_for, RawSample, RuntimeProfiler, RuntimeResults, SystemSampler, SystemWideProfile,
};
use crate::scheduling::{select_eligible, AgeGate, AgeTracker};
use crate::stacks::{ErrorMarker, ProcessSampleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Gating,
    Collecting,
    Merging,
    Emitting,
}

/// Per-cycle counters, logged when the cycle ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycle: u64,
    pub live: usize,
    /// Pids handed to a runtime profiler.
    pub eligible: usize,
    /// Old enough, but no profiler is registered for their runtime.
    pub unprofiled: usize,
    pub skipped_young: usize,
    pub native_only: usize,
    /// Pids whose runtime result was error-flagged.
    pub error_sets: usize,
    pub adapters_timed_out: usize,
    pub adapters_failed: usize,
    pub sampler_failed: bool,
    pub emit_failed: bool,
    pub outcomes: BTreeMap<MergeOutcome, usize>,
    pub total_samples: u64,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} live, {} eligible, {} too young, {} native-only, {} errors, {} samples",
            self.cycle,
            self.live,
            self.eligible,
            self.skipped_young,
            self.native_only,
            self.error_sets,
            self.total_samples
        )?;
        if self.unprofiled > 0 {
            write!(f, ", {} without a runtime profiler", self.unprofiled)?;
        }
        if self.adapters_timed_out > 0 {
            write!(f, ", {} adapter(s) timed out", self.adapters_timed_out)?;
        }
        if self.adapters_failed > 0 {
            write!(f, ", {} adapter(s) failed", self.adapters_failed)?;
        }
        if self.sampler_failed {
            write!(f, ", system-wide sampler failed")?;
        }
        if self.emit_failed {
            write!(f, ", not saved")?;
        }
        Ok(())
    }
}

/// Everything one cycle produced.
#[derive(Debug)]
pub struct CycleReport {
    pub stats: CycleStats,
    pub merged: MergedProfile,
}

enum Collected {
    System(Result<Vec<RawSample>, ProfilerError>),
    Runtime {
        name: String,
        pids: Vec<Pid>,
        result: Result<RuntimeResults, ProfilerError>,
    },
}

/// Runs sampling cycles against a set of sources and a sink.
pub struct Orchestrator {
    config: CycleConfig,
    processes: Arc<dyn ProcessSource>,
    sampler: Arc<dyn SystemSampler>,
    profilers: BTreeMap<RuntimeKind, Arc<dyn RuntimeProfiler>>,
    sink: Option<Box<dyn ProfileSink>>,
    tracker: AgeTracker,
    cycle: u64,
    phase: CyclePhase,
}

impl Orchestrator {
    pub fn new(
        config: CycleConfig,
        processes: Arc<dyn ProcessSource>,
        sampler: Arc<dyn SystemSampler>,
    ) -> Self {
        Self {
            tracker: AgeTracker::new(AgeGate::new(config.min_duration)),
            config,
            processes,
            sampler,
            profilers: BTreeMap::new(),
            sink: None,
            cycle: 0,
            phase: CyclePhase::Idle,
        }
    }

    /// Register a runtime profiler. A later profiler for the same runtime
    /// replaces the earlier one.
    #[must_use]
    pub fn with_profiler(mut self, profiler: Arc<dyn RuntimeProfiler>) -> Self {
        if let Some(old) = self.profilers.insert(profiler.runtime(), profiler) {
            warn!("Replacing {} profiler '{}'", old.runtime(), old.name());
        }
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ProfileSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Number of cycles started so far.
    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("cycle {}: {:?} -> {:?}", self.cycle, self.phase, phase);
        self.phase = phase;
    }

    /// Run one full cycle.
    ///
    /// # Errors
    /// Only a failed process snapshot aborts the cycle. Source, merge and
    /// sink failures are folded into the report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ProfilerError> {
        self.cycle += 1;
        let mut stats = CycleStats { cycle: self.cycle, ..CycleStats::default() };

        self.enter(CyclePhase::Gating);
        let (snapshot, now) = match self.discover().await {
            Ok(found) => found,
            Err(e) => {
                self.enter(CyclePhase::Idle);
                return Err(e);
            }
        };
        let selection = select_eligible(&snapshot, &mut self.tracker, now);
        let selection_total = selection.eligible_count();
        stats.live = snapshot.len();
        stats.skipped_young = selection.skipped_young.len();
        stats.native_only = selection.native_only;
        if !selection.skipped_young.is_empty() {
            debug!("Too young for runtime profiling: {:?}", selection.skipped_young);
        }

        self.enter(CyclePhase::Collecting);
        let started_at = SystemTime::now();
        let (mut tasks, handed) = self.spawn_sources(selection.by_runtime);
        stats.eligible = handed;
        stats.unprofiled = selection_total - handed;
        let mut runtime_results: BTreeMap<Pid, ProcessSampleSet> = BTreeMap::new();
        let mut system_wide = SystemWideProfile::empty();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Collected::System(Ok(samples))) => {
                    system_wide = SystemWideProfile::build(samples);
                }
                Ok(Collected::System(Err(e))) => {
                    warn!("System-wide sampler '{}' failed: {e}", self.sampler.name());
                    stats.sampler_failed = true;
                }
                Ok(Collected::Runtime { name, pids, result }) => {
                    collect_runtime(&name, &pids, result, &mut runtime_results, &mut stats);
                }
                Err(e) => warn!("Collection task failed: {e}"),
            }
        }
        stats.error_sets = runtime_results.values().filter(|set| set.is_error()).count();

        self.enter(CyclePhase::Merging);
        let mut merged = MergedProfile::build(&runtime_results, &system_wide);
        let labels: HashMap<Pid, &ProcessInfo> = snapshot.iter().map(|p| (p.pid, p)).collect();
        let pids: Vec<Pid> = merged.processes.keys().copied().collect();
        for pid in pids {
            if let Some(info) = labels.get(&pid) {
                merged.label(pid, &info.command, info.runtime);
            }
        }
        stats.outcomes = merged.outcome_counts();
        stats.total_samples = merged.total();
        debug!("Merge outcomes: {:?}", stats.outcomes);

        self.enter(CyclePhase::Emitting);
        if let Some(sink) = self.sink.as_mut() {
            let meta = CycleMetadata { cycle: self.cycle, started_at, config: self.config };
            if let Err(e) = sink.emit(&meta, &merged) {
                warn!("Failed to save cycle {}: {e}", self.cycle);
                stats.emit_failed = true;
            }
        }

        self.enter(CyclePhase::Idle);
        info!("{stats}");
        Ok(CycleReport { stats, merged })
    }

    async fn discover(&self) -> Result<(Vec<ProcessInfo>, Timestamp), ProfilerError> {
        let source = Arc::clone(&self.processes);
        tokio::task::spawn_blocking(move || Ok((source.snapshot()?, source.now()?)))
            .await
            .map_err(|e| ProfilerError::TaskPanicked(format!("process discovery: {e}")))?
    }

    /// Start every source; returns the tasks and the number of pids handed
    /// to runtime profilers.
    fn spawn_sources(&self, by_runtime: BTreeMap<RuntimeKind, Vec<Pid>>) -> (JoinSet<Collected>, usize) {
        let duration = self.config.cycle_duration;
        let timeout = self.config.adapter_timeout();
        let mut tasks = JoinSet::new();
        let mut handed = 0;

        let sampler = Arc::clone(&self.sampler);
        tasks.spawn(async move {
            let name = sampler.name().to_string();
            let result = bounded(&name, timeout, move || sampler.sample(duration)).await;
            Collected::System(result)
        });

        for (runtime, pids) in by_runtime {
            let Some(profiler) = self.profilers.get(&runtime).map(Arc::clone) else {
                debug!("No {runtime} profiler; {} pid(s) covered by the system-wide sampler", pids.len());
                continue;
            };
            handed += pids.len();
            tasks.spawn(async move {
                let name = profiler.name().to_string();
                let requested = pids.clone();
                let result = bounded(&name, timeout, move || profiler.profile(&requested, duration)).await;
                Collected::Runtime { name, pids, result }
            });
        }
        (tasks, handed)
    }

    /// Run cycles back to back until `max_cycles` have been started or
    /// `shutdown` resolves. A cycle in flight at shutdown is dropped.
    pub async fn run<F>(&mut self, max_cycles: Option<u64>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if max_cycles.is_some_and(|limit| self.cycle >= limit) {
                info!("Completed {} cycle(s)", self.cycle);
                break;
            }

            let result = tokio::select! {
                result = self.run_cycle() => result,
                () = &mut shutdown => {
                    info!("Shutting down; abandoning the cycle in flight");
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Cycle {} aborted: {e}; retrying next cycle", self.cycle);
                tokio::select! {
                    () = tokio::time::sleep(self.config.cycle_duration) => {}
                    () = &mut shutdown => {
                        info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Run a blocking source on the blocking pool, giving up after `timeout`.
async fn bounded<T, F>(name: &str, timeout: Duration, work: F) -> Result<T, ProfilerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProfilerError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ProfilerError::TaskPanicked(format!("{name}: {e}"))),
        Err(_) => Err(ProfilerError::Timeout {
            source_name: name.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn collect_runtime(
    name: &str,
    pids: &[Pid],
    result: Result<RuntimeResults, ProfilerError>,
    into: &mut BTreeMap<Pid, ProcessSampleSet>,
    stats: &mut CycleStats,
) {
    match result {
        Ok(mut sets) => {
            for &pid in pids {
                let set = sets.remove(&pid).unwrap_or_else(|| {
                    warn!("{name}: no result for {pid}");
                    ProcessSampleSet::error(ErrorMarker::new("missing").with_message(name))
                });
                into.insert(pid, set);
            }
            if !sets.is_empty() {
                debug!("{name}: ignoring {} unrequested pid(s)", sets.len());
            }
        }
        Err(e) => {
            if matches!(e, ProfilerError::Timeout { .. }) {
                stats.adapters_timed_out += 1;
            } else {
                stats.adapters_failed += 1;
            }
            warn!("{name} failed for {} pid(s): {e}", pids.len());
            let marker = error_marker_for(&e);
            for &pid in pids {
                into.insert(pid, ProcessSampleSet::error(marker.clone()));
            }
        }
    }
}
