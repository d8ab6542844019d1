//! Sample sources
//!
//! Two kinds of source feed each cycle:
//! - `RuntimeProfiler`: one per language runtime, attaches to the eligible
//!   pids of that runtime and reports in-process stacks (or an error marker)
//!   per pid
//! - `SystemSampler`: whole-host sampler reporting native/kernel stacks for
//!   every pid, indexed by `system_wide::SystemWideProfile`
//!
//! Both are blocking: implementations typically wait on a subprocess for the
//! whole window. The orchestrator runs each on its own blocking task and
//! bounds the wait, so implementations do not need their own timeout.

pub mod command;
pub mod system_wide;

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{Pid, ProfilerError, RuntimeKind};
use crate::stacks::{ErrorMarker, ProcessSampleSet, Stack};

pub use command::{CommandProfiler, CommandSampler, CommandSpec};
pub use system_wide::SystemWideProfile;

/// Per-pid results of one runtime profiler invocation.
pub type RuntimeResults = HashMap<Pid, ProcessSampleSet>;

/// A language-specific profiler.
///
/// Implementations must not share mutable state with other profilers; the
/// returned map is their only output.
pub trait RuntimeProfiler: Send + Sync {
    /// Short identifier used in logs and error markers.
    fn name(&self) -> &str;

    /// Runtime whose processes this profiler handles.
    fn runtime(&self) -> RuntimeKind;

    /// Profile `pids` for `duration`.
    ///
    /// Per-pid failures should be returned as error-flagged sets. Pids left
    /// out of the map are treated as failed by the orchestrator.
    ///
    /// # Errors
    /// An `Err` marks every requested pid as failed for this cycle.
    fn profile(&self, pids: &[Pid], duration: Duration) -> Result<RuntimeResults, ProfilerError>;
}

/// One aggregated observation from the system-wide sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    pub pid: Pid,
    pub stack: Stack,
    pub count: u64,
}

/// The whole-host sampler.
pub trait SystemSampler: Send + Sync {
    fn name(&self) -> &str;

    /// Sample every process for `duration`.
    ///
    /// # Errors
    /// Any failure is treated as a total collapse: every pid gets a
    /// system-wide total of zero for the cycle.
    fn sample(&self, duration: Duration) -> Result<Vec<RawSample>, ProfilerError>;
}

/// Convert a per-pid failure into the marker carried by its error stack.
pub fn error_marker_for(err: &ProfilerError) -> ErrorMarker {
    match err {
        ProfilerError::SpawnFailed { error, .. } => ErrorMarker::new("spawn").with_message(error.clone()),
        ProfilerError::CommandFailed { status, stderr, .. } => {
            let message = if stderr.is_empty() { status.clone() } else { format!("{status}: {stderr}") };
            ErrorMarker::new("exit").with_message(message)
        }
        ProfilerError::MalformedStack { .. } => ErrorMarker::new("parse").with_message(err.to_string()),
        ProfilerError::Timeout { timeout_ms, .. } => {
            ErrorMarker::new("timeout").with_message(format!("{timeout_ms}ms"))
        }
        other => ErrorMarker::new("error").with_message(other.to_string()),
    }
}
