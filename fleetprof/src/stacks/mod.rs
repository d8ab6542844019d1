//! Collapsed stack model
//!
//! The shared representation every other module speaks:
//! - `Frame`: one call-stack level, either a symbol or an error marker
//! - `Stack`: frames stored leaf-to-root
//! - `Profile`: stack → sample count, zero counts never stored
//! - `ProcessSampleSet`: a process's profile from one source, possibly error-flagged
//!
//! Runtime profiler failures travel through the same `Profile` type as a
//! single-frame stack holding an `ErrorMarker`, so aggregation and output
//! need no side channel for them.

pub mod collapsed;
pub mod frame;
pub mod profile;
pub mod stack;

pub use collapsed::{parse_collapsed, to_collapsed_string, write_collapsed};
pub use frame::{ErrorMarker, Frame};
pub use profile::{ProcessSampleSet, Profile};
pub use stack::{is_error_stack, Stack};
