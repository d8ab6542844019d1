//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a raw tick count
//! where a nanosecond timestamp is expected, and make function signatures
//! more expressive.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Process ID
///
/// Represents a process ID in the system. PIDs are reused by the kernel,
/// so anything that outlives a cycle pairs a `Pid` with its creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// Timestamp in nanoseconds
///
/// Represents an absolute point in time as nanoseconds since boot. Process
/// creation times and the scheduler's notion of "now" share this clock, so
/// ages never go backwards with wall-clock adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Build a timestamp from fractional seconds since boot.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs.max(0.0) * 1_000_000_000.0).round() as u64)
    }

    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Timestamp) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Language runtime detected for a process.
///
/// Each kind maps to at most one runtime profiler adapter per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Python,
    Java,
    Ruby,
    Node,
    Php,
    Dotnet,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 6] = [
        RuntimeKind::Python,
        RuntimeKind::Java,
        RuntimeKind::Ruby,
        RuntimeKind::Node,
        RuntimeKind::Php,
        RuntimeKind::Dotnet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Python => "python",
            RuntimeKind::Java => "java",
            RuntimeKind::Ruby => "ruby",
            RuntimeKind::Node => "node",
            RuntimeKind::Php => "php",
            RuntimeKind::Dotnet => "dotnet",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuntimeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown runtime '{s}'"))
    }
}
