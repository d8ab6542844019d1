//! Collapsed ("folded") stack text format.
//!
//! One stack per line, frames root-to-leaf separated by `;`, then a space and
//! the sample count:
//!
//! ```text
//! main;handle_request;parse 42
//! main;[error:timeout] 1
//! ```
//!
//! Blank lines and `#` comment lines are ignored when parsing.

use std::io::{self, Write};

use super::frame::Frame;
use super::profile::Profile;
use super::stack::Stack;
use crate::domain::ProfilerError;

/// Parse a single collapsed line.
///
/// Returns `Ok(None)` for lines that carry no samples (blank, comment, or
/// a zero count).
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<(Stack, u64)>, ProfilerError> {
    let line = line.trim_end();
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (frames, count) = line.rsplit_once(' ').ok_or_else(|| ProfilerError::MalformedStack {
        line: line_no,
        reason: "missing sample count".to_string(),
    })?;
    let count: u64 = count.parse().map_err(|_| ProfilerError::MalformedStack {
        line: line_no,
        reason: format!("invalid sample count '{count}'"),
    })?;
    if frames.is_empty() {
        return Err(ProfilerError::MalformedStack {
            line: line_no,
            reason: "empty stack".to_string(),
        });
    }
    if count == 0 {
        return Ok(None);
    }

    let stack = Stack::from_root_first(frames.split(';').map(Frame::parse).collect::<Vec<_>>());
    Ok(Some((stack, count)))
}

/// Parse a whole collapsed document into a profile, folding duplicate lines.
pub fn parse_collapsed(text: &str) -> Result<Profile, ProfilerError> {
    let mut profile = Profile::new();
    for (i, line) in text.lines().enumerate() {
        if let Some((stack, count)) = parse_line(line, i + 1)? {
            profile.add(stack, count);
        }
    }
    Ok(profile)
}

/// Write `profile` as collapsed lines.
pub fn write_collapsed<W: Write>(profile: &Profile, mut writer: W) -> io::Result<()> {
    for (stack, count) in profile {
        writeln!(writer, "{stack} {count}")?;
    }
    Ok(())
}

/// Render `profile` to a collapsed string.
pub fn to_collapsed_string(profile: &Profile) -> String {
    let mut out = String::new();
    for (stack, count) in profile {
        out.push_str(&format!("{stack} {count}\n"));
    }
    out
}
