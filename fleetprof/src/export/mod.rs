//! Profile export
//!
//! The orchestrator hands every merged cycle to a `ProfileSink`. A sink
//! failure is reported and the next cycle proceeds; it never invalidates
//! the merged profile. Currently supports collapsed text files with a JSON
//! metadata header, optionally gzip-compressed.

pub mod collapsed_file;

use std::time::{SystemTime, UNIX_EPOCH};

pub use collapsed_file::CollapsedFileSink;

use crate::config::CycleConfig;
use crate::domain::ExportError;
use crate::merge::MergedProfile;

/// Identifies the cycle a merged profile belongs to.
#[derive(Debug, Clone)]
pub struct CycleMetadata {
    /// 1-based cycle number since the agent started.
    pub cycle: u64,
    /// Wall-clock time the sampling window opened.
    pub started_at: SystemTime,
    pub config: CycleConfig,
}

impl CycleMetadata {
    pub fn start_unix_secs(&self) -> f64 {
        self.started_at.duration_since(UNIX_EPOCH).map_or(0.0, |d| d.as_secs_f64())
    }
}

/// Destination for merged cycle output.
pub trait ProfileSink: Send {
    /// # Errors
    /// Returns an `ExportError` if the profile could not be written.
    fn emit(&mut self, meta: &CycleMetadata, merged: &MergedProfile) -> Result<(), ExportError>;
}
